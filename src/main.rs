//! media-grab：基于 yt-dlp 的媒体下载器（TUI / Web / CLI）。
//!
//! 本 crate 负责：配置加载、交互界面、格式菜单与下载调度。站点解析、
//! 传输与转码全部交给外部的 yt-dlp（及 ffmpeg）。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/URL 规范化等基础设施
//! - `extractor`：yt-dlp 子进程封装、进度行解析、托管安装
//! - `download`：格式菜单、下载计划、进度汇总与批量下载
//! - `ui`：TUI、无 UI（逐行 CLI）与 Web 三套交互

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::{info, warn};

mod base_system;
mod download;
mod extractor;
mod ui;

use base_system::config::load_or_create_with_base;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use extractor::{ExtractorError, MediaExtractor, YtDlp};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "media-grab")]
#[command(about = "Download videos and audio through yt-dlp (TUI, web UI or CLI)")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 启用服务器模式（Web UI）
    #[arg(long, default_value_t = false)]
    server: bool,

    /// Web UI 密码（启用锁模式，防止陌生人使用）
    #[arg(long)]
    password: Option<String>,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（用于存放 config.yml、logs 和 bin/，方便 Docker 挂载）
    #[arg(long)]
    data_dir: Option<String>,

    /// 强制使用逐行提问的 CLI
    #[arg(long, default_value_t = false)]
    cli: bool,

    /// 直接下载该 URL 后退出（不进入交互界面）
    #[arg(long)]
    url: Option<String>,

    /// 与 --url 搭配：yt-dlp 格式 ID 或选择器
    #[arg(long, requires = "url")]
    format: Option<String>,

    /// 与 --url 搭配：只下载音频并转码
    #[arg(long, default_value_t = false, requires = "url", conflicts_with = "format")]
    audio: bool,

    /// 下载 yt-dlp 官方可执行文件到数据目录后退出
    #[arg(long, default_value_t = false)]
    install_extractor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Once,
    Server,
    Cli,
    Tui,
}

impl Mode {
    fn pick(cli: &Cli, config: &Config) -> Self {
        if cli.url.is_some() {
            Mode::Once
        } else if cli.server {
            Mode::Server
        } else if cli.cli || config.classic_cli {
            Mode::Cli
        } else {
            Mode::Tui
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("media-grab v{}", VERSION);
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref().map(Path::new);
    let mut config = load_or_create_with_base::<Config>(None, data_dir)
        .map_err(|e| anyhow!(e.to_string()))?;
    config.set_data_dir(data_dir);

    let mode = if cli.install_extractor {
        Mode::Cli
    } else {
        Mode::pick(&cli, &config)
    };
    let log = init_logging(cli.debug, mode, data_dir)?;
    info!(
        target: "startup",
        version = VERSION,
        ?mode,
        logs = %log.logs_dir().display(),
        "media-grab 启动"
    );

    if cli.install_extractor {
        let path = extractor::install::install_managed(&config.data_dir())?;
        println!("yt-dlp installed to {}", path.display());
        return Ok(());
    }

    let ytdlp = match YtDlp::from_config(&config) {
        Ok(y) => y,
        Err(ExtractorError::NotFound) => {
            warn!(target: "startup", "未找到 yt-dlp");
            eprintln!(
                "yt-dlp was not found.\n\
                 Install it (e.g. `pip install yt-dlp`), set extractor_path in config.yml,\n\
                 or run `media-grab --install-extractor` to download it into the data directory."
            );
            return Err(anyhow!(ExtractorError::NotFound));
        }
        Err(e) => return Err(anyhow!(e)),
    };
    match ytdlp.version() {
        Ok(v) => info!(target: "startup", bin = %ytdlp.bin().display(), version = %v, "yt-dlp 可用"),
        Err(e) => warn!(target: "startup", error = %e, "读取 yt-dlp 版本失败"),
    }
    let extractor_label = ytdlp.bin().display().to_string();
    let extractor: Arc<dyn MediaExtractor> = Arc::new(ytdlp);

    match mode {
        Mode::Once => {
            let url = cli.url.as_deref().unwrap_or_default();
            let report = ui::noui::run_once(
                &config,
                extractor.as_ref(),
                url,
                cli.format.as_deref(),
                cli.audio,
            )?;
            for file in &report.files {
                println!("Saved: {}", file.display());
            }
            Ok(())
        }
        Mode::Server => ui::web::run(&config, extractor, extractor_label, cli.password),
        Mode::Cli => ui::noui::run(&config, extractor.as_ref()),
        Mode::Tui => match ui::tui::run(config.clone(), extractor.clone())? {
            ui::tui::TuiExit::Quit => Ok(()),
            ui::tui::TuiExit::SwitchToCli => {
                info!(target: "startup", "从 TUI 切换到命令行模式");
                ui::noui::run(&config, extractor.as_ref())
            }
        },
    }
}

fn init_logging(debug: bool, mode: Mode, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = match mode {
        // Web 模式由 tokio 处理 Ctrl+C，以便优雅停机。
        Mode::Server => LogOptions {
            debug,
            console: true,
            broadcast_to_ui: false,
            handle_interrupt: false,
            ..LogOptions::default()
        },
        // TUI 占用整个终端，日志改为推送到界面内的日志框。
        Mode::Tui => LogOptions {
            debug,
            console: false,
            broadcast_to_ui: true,
            interrupt_message: Some(ui::noui::INTERRUPT_MESSAGE),
            ..LogOptions::default()
        },
        Mode::Cli | Mode::Once => LogOptions {
            debug,
            console: false,
            broadcast_to_ui: false,
            interrupt_message: Some(ui::noui::INTERRUPT_MESSAGE),
            ..LogOptions::default()
        },
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("media-grab").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn url_wins_over_other_modes() {
        let cli = parse(&["--server", "--url", "https://youtu.be/x"]);
        assert_eq!(Mode::pick(&cli, &Config::default()), Mode::Once);
    }

    #[test]
    fn classic_cli_config_selects_prompt_mode() {
        let cfg = Config {
            classic_cli: true,
            ..Config::default()
        };
        assert_eq!(Mode::pick(&parse(&[]), &cfg), Mode::Cli);
        assert_eq!(Mode::pick(&parse(&[]), &Config::default()), Mode::Tui);
        assert_eq!(Mode::pick(&parse(&["--server"]), &cfg), Mode::Server);
    }

    #[test]
    fn format_and_audio_need_url() {
        let argv = ["media-grab", "--audio"];
        assert!(Cli::try_parse_from(argv).is_err());
        let argv = ["media-grab", "--url", "u", "--audio", "--format", "18"];
        assert!(Cli::try_parse_from(argv).is_err());
        let cli = parse(&["--url", "u", "--format", "18"]);
        assert_eq!(cli.format.as_deref(), Some("18"));
    }
}
