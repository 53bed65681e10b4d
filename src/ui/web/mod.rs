//! Web 界面（axum）：格式查询、同步表单下载、后台任务与 SSE 进度推送。

mod router;
mod routes;
mod state;
mod templates;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::base_system::context::Config;
use crate::extractor::MediaExtractor;
use state::{AppState, AuthState};

pub const ADDR_ENV: &str = "MEDIA_GRAB_WEB_ADDR";
pub const PASSWORD_ENV: &str = "MEDIA_GRAB_WEB_PASSWORD";

pub fn run(
    config: &Config,
    extractor: Arc<dyn MediaExtractor>,
    extractor_label: String,
    password: Option<String>,
) -> Result<()> {
    let bind_raw = std::env::var(ADDR_ENV).unwrap_or_else(|_| config.web_bind.clone());
    let bind_addrs = parse_bind_addrs(&bind_raw)?;

    let auth = password
        .or_else(|| std::env::var(PASSWORD_ENV).ok())
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(|p| AuthState::from_password(&p));

    let state = AppState::new(
        config.clone(),
        extractor,
        extractor_label,
        auth,
        bind_addrs.clone(),
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let res = rt.block_on(run_async(bind_addrs, state));
    // 不等待仍在收尾的阻塞任务（已取消的下载）。
    rt.shutdown_timeout(Duration::from_secs(1));
    res
}

fn parse_bind_addr(raw: &str) -> Result<SocketAddr> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(anyhow!("empty bind addr"));
    }

    if let Ok(a) = s.parse::<SocketAddr>() {
        return Ok(a);
    }

    // 容忍不带方括号的 IPv6，如 "::1:8080"：最后一段全是数字时视为端口。
    if !s.starts_with('[')
        && let Some((host, port)) = s.rsplit_once(':')
        && host.contains(':')
        && !port.is_empty()
        && port.chars().all(|c| c.is_ascii_digit())
        && let Ok(a) = format!("[{host}]:{port}").parse::<SocketAddr>()
    {
        return Ok(a);
    }

    Err(anyhow!(
        "invalid {ADDR_ENV}: '{s}'. Use '127.0.0.1:5000' or '[::1]:5000'. Separate multiple binds with commas."
    ))
}

fn parse_bind_addrs(raw: &str) -> Result<Vec<SocketAddr>> {
    let mut out = Vec::new();
    for part in raw.split([',', ';']).map(str::trim).filter(|s| !s.is_empty()) {
        let a = parse_bind_addr(part)?;
        if !out.contains(&a) {
            out.push(a);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("empty {ADDR_ENV}"));
    }
    Ok(out)
}

/// 收到停止信号后等待连接关闭的最长时间。
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

async fn run_async(bind_addrs: Vec<SocketAddr>, state: AppState) -> Result<()> {
    let listeners = bind_listeners(bind_addrs, state.auth.is_some()).await?;
    println!("Press Ctrl+C to stop.");
    serve_until(listeners, state, shutdown_signal(), SHUTDOWN_GRACE).await
}

async fn bind_listeners(
    bind_addrs: Vec<SocketAddr>,
    locked: bool,
) -> Result<Vec<(SocketAddr, TcpListener)>> {
    let mut listeners = Vec::new();
    for bind in bind_addrs {
        let listener = match TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                // 双栈系统上 [::] 可能已经覆盖 0.0.0.0，已有监听时跳过 AddrInUse。
                if !listeners.is_empty() && e.kind() == std::io::ErrorKind::AddrInUse {
                    warn!(target: "web", bind = %bind, error = %e, "端口已被其他监听覆盖，跳过");
                    continue;
                }
                return Err(anyhow!(e).context(format!("bind failed: {bind}")));
            }
        };

        info!(target: "web", locked, "Web UI listening on http://{bind}/");
        if locked {
            println!("Web UI listening on http://{bind}/ (LOCKED)");
        } else {
            println!("Web UI listening on http://{bind}/");
        }
        listeners.push((bind, listener));
    }

    if listeners.is_empty() {
        return Err(anyhow!("no listeners started (check {ADDR_ENV})"));
    }
    Ok(listeners)
}

/// 运行所有监听器直到 `signal` 完成。
///
/// 信号到达后先取消后台任务（yt-dlp 子进程随之退出）并关闭 SSE 流，
/// 再让 axum 优雅停止；超过 `grace` 仍有连接未关闭时不再等待。
async fn serve_until<F>(
    listeners: Vec<(SocketAddr, TcpListener)>,
    state: AppState,
    signal: F,
    grace: Duration,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    {
        let state = state.clone();
        tokio::spawn(async move {
            signal.await;
            state.begin_shutdown();
        });
    }

    let mut servers = Vec::new();
    for (bind, listener) in listeners {
        let app = router::build_router(state.clone());
        let mut stop = state.shutdown_receiver();
        servers.push(tokio::spawn(async move {
            let res = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop.wait_for(|stopping| *stopping).await;
            })
            .await;
            info!(target: "web", bind = %bind, "监听已关闭");
            res
        }));
    }

    let all_servers = async move {
        for h in servers {
            h.await
                .map_err(|e| anyhow!("server task join failed: {e}"))?
                .map_err(|e| anyhow!(e))?;
        }
        Ok::<(), anyhow::Error>(())
    };
    tokio::pin!(all_servers);

    let mut stop = state.shutdown_receiver();
    let grace_expired = async move {
        let _ = stop.wait_for(|stopping| *stopping).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        res = &mut all_servers => res?,
        _ = grace_expired => {
            warn!(target: "web", secs = grace.as_secs(), "仍有连接未关闭，停止等待");
        }
    }
    info!(target: "web", "Web 服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    println!("Stopping server...");
}
