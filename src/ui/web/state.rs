use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, watch};

use crate::base_system::context::Config;
use crate::download::models::{BatchReport, ProgressSnapshot};
use crate::extractor::MediaExtractor;

const EVENT_CAPACITY: usize = 256;
/// 保留的已结束任务数，超出后创建新任务时删除最旧的记录。
pub(crate) const MAX_FINISHED_JOBS: usize = 100;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) bind_addrs: Arc<Vec<SocketAddr>>,
    pub(crate) config: Arc<Config>,
    pub(crate) extractor: Arc<dyn MediaExtractor>,
    /// 提取器可执行文件路径，仅用于状态接口展示。
    pub(crate) extractor_label: Arc<String>,
    pub(crate) library_root: Arc<PathBuf>,
    pub(crate) jobs: Arc<JobStore>,
    pub(crate) auth: Option<AuthState>,
    /// 置为 true 后服务停止接受连接，SSE 流随之结束。
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub(crate) fn new(
        config: Config,
        extractor: Arc<dyn MediaExtractor>,
        extractor_label: String,
        auth: Option<AuthState>,
        bind_addrs: Vec<SocketAddr>,
    ) -> Self {
        let library_root = config.default_save_dir();
        Self {
            bind_addrs: Arc::new(bind_addrs),
            config: Arc::new(config),
            extractor,
            extractor_label: Arc::new(extractor_label),
            library_root: Arc::new(library_root),
            jobs: Arc::new(JobStore::new()),
            auth,
            shutdown: Arc::new(watch::Sender::new(false)),
        }
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// 取消所有未结束的任务并通知 SSE 流与监听器退出。
    pub(crate) fn begin_shutdown(&self) {
        for job in self.jobs.list() {
            self.jobs.request_cancel(job.id);
        }
        self.shutdown.send_replace(true);
    }
}

#[derive(Clone)]
pub(crate) struct AuthState {
    pub(crate) password_sha256: [u8; 32],
}

impl AuthState {
    pub(crate) fn from_password(password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        let mut password_sha256 = [0u8; 32];
        password_sha256.copy_from_slice(&digest);
        Self { password_sha256 }
    }

    pub(crate) fn verify_password(&self, password: &str) -> bool {
        Sha256::digest(password.as_bytes()).as_slice() == self.password_sha256
    }

    /// 会话 cookie 的值：由密码摘要派生，不直接暴露密码。
    pub(crate) fn session_token(&self) -> String {
        let mut h = Sha256::new();
        h.update(b"media-grab-session:");
        h.update(hex::encode(self.password_sha256).as_bytes());
        hex::encode(h.finalize())
    }

    pub(crate) fn verify_session_token(&self, token: &str) -> bool {
        token == self.session_token()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum JobState {
    Queued,
    Running,
    /// 已请求取消，等待工作线程写入最终状态。
    Canceling,
    Done,
    Failed,
    Canceled,
}

impl JobState {
    fn is_finished(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Canceled)
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobInfo {
    pub(crate) id: u64,
    pub(crate) url: String,
    pub(crate) format_id: String,
    pub(crate) title: Option<String>,
    pub(crate) state: JobState,
    pub(crate) progress: Option<ProgressSnapshot>,
    pub(crate) message: Option<String>,
    /// 相对媒体库根目录的文件路径，可拼到 `/files/` 后下载。
    pub(crate) files: Vec<String>,
    pub(crate) created_ms: u64,
    pub(crate) updated_ms: u64,
}

/// 推送给 SSE 订阅者的任务事件。
#[derive(Debug, Clone)]
pub(crate) struct JobEvent {
    pub(crate) kind: &'static str,
    pub(crate) job: JobInfo,
}

#[derive(Debug, Clone)]
pub(crate) struct JobHandle {
    pub(crate) id: u64,
    pub(crate) cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
struct JobEntry {
    info: JobInfo,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
pub(crate) struct JobStore {
    next_id: AtomicU64,
    inner: Mutex<HashMap<u64, JobEntry>>,
    events: broadcast::Sender<JobEvent>,
}

impl JobStore {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            next_id: AtomicU64::new(0),
            inner: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub(crate) fn create(&self, url: String, format_id: String) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let now = now_ms();
        let cancel = Arc::new(AtomicBool::new(false));

        let info = JobInfo {
            id,
            url,
            format_id,
            title: None,
            state: JobState::Queued,
            progress: None,
            message: None,
            files: Vec::new(),
            created_ms: now,
            updated_ms: now,
        };

        let mut g = self.inner.lock().unwrap();
        g.insert(
            id,
            JobEntry {
                info: info.clone(),
                cancel: cancel.clone(),
            },
        );
        let pruned = prune_finished(&mut g);
        drop(g);
        for old in pruned {
            self.emit("removed", old);
        }
        self.emit("queued", info);

        JobHandle { id, cancel }
    }

    pub(crate) fn get(&self, id: u64) -> Option<JobInfo> {
        let g = self.inner.lock().unwrap();
        g.get(&id).map(|e| e.info.clone())
    }

    pub(crate) fn list(&self) -> Vec<JobInfo> {
        let g = self.inner.lock().unwrap();
        let mut v: Vec<JobInfo> = g.values().map(|e| e.info.clone()).collect();
        v.sort_by(|a, b| {
            b.updated_ms
                .cmp(&a.updated_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        v
    }

    pub(crate) fn set_running(&self, id: u64) {
        self.update(id, "progress", |j| {
            j.state = JobState::Running;
            j.message = None;
        });
    }

    pub(crate) fn set_title(&self, id: u64, title: String) {
        self.update(id, "progress", |j| j.title = Some(title));
    }

    pub(crate) fn set_progress(&self, id: u64, snap: ProgressSnapshot) {
        self.update(id, "progress", |j| j.progress = Some(snap));
    }

    pub(crate) fn set_done(&self, id: u64, report: &BatchReport, root: &Path) {
        let files = report
            .files
            .iter()
            .map(|f| {
                f.strip_prefix(root)
                    .unwrap_or(f)
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        self.update(id, "done", |j| {
            j.state = JobState::Done;
            j.message = None;
            j.files = files;
            if j.title.is_none() {
                j.title = report.title.clone();
            }
        });
    }

    pub(crate) fn set_failed(&self, id: u64, msg: String) {
        self.update(id, "failed", |j| {
            j.state = JobState::Failed;
            j.message = Some(msg);
        });
    }

    pub(crate) fn set_canceled(&self, id: u64) {
        self.update(id, "canceled", |j| {
            j.state = JobState::Canceled;
            j.message = Some("canceled".to_string());
        });
    }

    /// 请求取消：任务进入 Canceling，最终状态由工作线程写入。
    /// 已结束的任务保持原状态。任务不存在时返回 false。
    pub(crate) fn request_cancel(&self, id: u64) -> bool {
        let mut g = self.inner.lock().unwrap();
        let Some(e) = g.get_mut(&id) else {
            return false;
        };
        if e.info.state.is_finished() || e.info.state == JobState::Canceling {
            return true;
        }
        e.cancel.store(true, Ordering::Relaxed);
        e.info.state = JobState::Canceling;
        e.info.message = Some("cancel requested".to_string());
        e.info.updated_ms = now_ms();
        let info = e.info.clone();
        drop(g);
        self.emit("canceling", info);
        true
    }

    /// 删除任务记录；仍在运行的任务会先被取消。
    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut g = self.inner.lock().unwrap();
        let Some(e) = g.remove(&id) else {
            return false;
        };
        drop(g);
        e.cancel.store(true, Ordering::Relaxed);
        self.emit("removed", e.info);
        true
    }

    fn update<F: FnOnce(&mut JobInfo)>(&self, id: u64, kind: &'static str, f: F) {
        let mut g = self.inner.lock().unwrap();
        let Some(e) = g.get_mut(&id) else {
            return;
        };
        // 结束后的回调一律忽略；取消中只接受最终状态。
        let canceling = e.info.state == JobState::Canceling;
        if e.info.state.is_finished() || (canceling && kind == "progress") {
            return;
        }
        f(&mut e.info);
        e.info.updated_ms = now_ms();
        let info = e.info.clone();
        drop(g);
        self.emit(kind, info);
    }

    fn emit(&self, kind: &'static str, job: JobInfo) {
        // 没有订阅者时发送失败，忽略即可。
        let _ = self.events.send(JobEvent { kind, job });
    }
}

fn prune_finished(jobs: &mut HashMap<u64, JobEntry>) -> Vec<JobInfo> {
    let mut finished: Vec<(u64, u64)> = jobs
        .values()
        .filter(|e| e.info.state.is_finished())
        .map(|e| (e.info.updated_ms, e.info.id))
        .collect();
    if finished.len() <= MAX_FINISHED_JOBS {
        return Vec::new();
    }
    finished.sort_unstable();
    let excess = finished.len() - MAX_FINISHED_JOBS;
    finished[..excess]
        .iter()
        .filter_map(|(_, id)| jobs.remove(id))
        .map(|e| e.info)
        .collect()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
