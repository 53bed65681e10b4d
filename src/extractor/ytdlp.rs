//! 以子进程方式驱动 yt-dlp。

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::hook::{self, HookLine};
use super::models::{DownloadOptions, DownloadOutcome, MediaInfo, ProgressEvent};
use super::{ExtractorError, MediaExtractor};
use crate::base_system::context::Config;

const STDERR_RING: usize = 200;
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

pub fn binary_name() -> &'static str {
    if cfg!(windows) { "yt-dlp.exe" } else { "yt-dlp" }
}

/// `--install-extractor` 安装的位置：`<data_dir>/bin/yt-dlp`。
pub fn managed_path(data_dir: &Path) -> PathBuf {
    data_dir.join("bin").join(binary_name())
}

/// 查找顺序：配置中的 `extractor_path` → PATH 中可运行的 yt-dlp → 数据目录 bin/。
pub fn locate(cfg: &Config) -> Option<PathBuf> {
    if let Some(explicit) = cfg.extractor_override() {
        if explicit.exists() {
            return Some(explicit);
        }
        warn!(target: "extractor", path = %explicit.display(), "配置的 extractor_path 不存在，继续自动查找");
    }

    let on_path = Command::new(binary_name())
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if on_path {
        return Some(PathBuf::from(binary_name()));
    }

    let managed = managed_path(&cfg.data_dir());
    managed.exists().then_some(managed)
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    bin: PathBuf,
    probe_timeout: Duration,
    max_retries: u32,
}

impl YtDlp {
    pub fn new(bin: impl Into<PathBuf>, probe_timeout: Duration, max_retries: u32) -> Self {
        Self {
            bin: bin.into(),
            probe_timeout,
            max_retries,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ExtractorError> {
        let bin = locate(cfg).ok_or(ExtractorError::NotFound)?;
        debug!(target: "extractor", bin = %bin.display(), "使用 yt-dlp");
        Ok(Self::new(
            bin,
            Duration::from_secs(cfg.probe_timeout),
            cfg.max_retries,
        ))
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    pub fn version(&self) -> Result<String, ExtractorError> {
        let output = self
            .command()
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|source| self.spawn_error(source))?;
        if !output.status.success() {
            return Err(ExtractorError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn command(&self) -> Command {
        Command::new(&self.bin)
    }

    fn spawn_error(&self, source: std::io::Error) -> ExtractorError {
        ExtractorError::Spawn {
            bin: self.bin.display().to_string(),
            source,
        }
    }

    fn probe_once(&self, url: &str, flat: bool) -> Result<MediaInfo, ExtractorError> {
        let mut cmd = self.command();
        cmd.args(probe_args(url, flat))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = cmd.spawn().map_err(|source| self.spawn_error(source))?;
        let (code, stdout, stderr) = wait_with_output_timeout(child, self.probe_timeout)?;

        if code != Some(0) {
            return Err(ExtractorError::Failed { code, stderr });
        }
        Ok(serde_json::from_slice::<MediaInfo>(&stdout)?)
    }
}

impl MediaExtractor for YtDlp {
    fn probe(&self, url: &str, flat: bool) -> Result<MediaInfo, ExtractorError> {
        let mut attempt = 0;
        loop {
            match self.probe_once(url, flat) {
                Ok(info) => return Ok(info),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        target: "extractor",
                        attempt,
                        max = self.max_retries,
                        "读取媒体信息失败，稍后重试: {err}"
                    );
                    thread::sleep(RETRY_BACKOFF * attempt);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn download(
        &self,
        url: &str,
        opts: &DownloadOptions,
        on_progress: &mut dyn FnMut(ProgressEvent),
        cancel: Option<&AtomicBool>,
    ) -> Result<DownloadOutcome, ExtractorError> {
        let args = download_args(url, opts);
        debug!(target: "extractor", ?args, "启动 yt-dlp 下载");

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| self.spawn_error(source))?;

        let stderr_lines = Arc::new(Mutex::new(VecDeque::<String>::new()));
        let stderr_reader = child.stderr.take().map(|stream| {
            let ring = Arc::clone(&stderr_lines);
            thread::spawn(move || {
                for line in BufReader::new(stream).lines().map_while(Result::ok) {
                    debug!(target: "extractor", "yt-dlp stderr: {line}");
                    if let Ok(mut lines) = ring.lock() {
                        lines.push_back(line);
                        if lines.len() > STDERR_RING {
                            lines.pop_front();
                        }
                    }
                }
            })
        });

        // stdout 在独立线程读取，主循环才能在没有输出时也响应取消。
        let (line_tx, line_rx) = mpsc::channel::<String>();
        let stdout_reader = child.stdout.take().map(|stream| {
            thread::spawn(move || {
                for line in BufReader::new(stream).lines().map_while(Result::ok) {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            })
        });

        let mut outcome = DownloadOutcome::default();
        if let Some(reader) = stdout_reader {
            loop {
                stop_if_canceled(&mut child, cancel)?;
                match line_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => match hook::parse_line(&line) {
                        Some(HookLine::Progress(ev)) => on_progress(ev),
                        Some(HookLine::FinalFile(path)) => {
                            info!(target: "extractor", file = %path, "文件已保存");
                            on_progress(ProgressEvent::finished(path.clone()));
                            outcome.files.push(PathBuf::from(path));
                        }
                        None => debug!(target: "extractor", "yt-dlp: {line}"),
                    },
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let _ = reader.join();
        }

        // stdout 关闭后进程可能仍在后处理（ffmpeg），等待期间也要响应取消。
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            stop_if_canceled(&mut child, cancel)?;
            thread::sleep(POLL_INTERVAL);
        };
        if let Some(reader) = stderr_reader {
            let _ = reader.join();
        }

        if !status.success() {
            let stderr = stderr_lines
                .lock()
                .map(|mut lines| lines.make_contiguous().join("\n"))
                .unwrap_or_default();
            return Err(ExtractorError::Failed {
                code: status.code(),
                stderr,
            });
        }

        outcome.title = outcome
            .files
            .first()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned());
        Ok(outcome)
    }
}

fn stop_if_canceled(
    child: &mut Child,
    cancel: Option<&AtomicBool>,
) -> Result<(), ExtractorError> {
    if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
        info!(target: "extractor", "收到取消请求，终止 yt-dlp");
        let _ = child.kill();
        let _ = child.wait();
        return Err(ExtractorError::Canceled);
    }
    Ok(())
}

pub fn probe_args(url: &str, flat: bool) -> Vec<String> {
    let mut args = vec![
        "--dump-single-json".to_string(),
        "--no-warnings".to_string(),
    ];
    if flat {
        args.push("--flat-playlist".to_string());
    }
    // URL 之前加 "--"，以 '-' 开头的输入不会被当成选项。
    args.push("--".to_string());
    args.push(url.to_string());
    args
}

pub fn download_args(url: &str, opts: &DownloadOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--newline".into(),
        "--no-warnings".into(),
        "-f".into(),
        opts.format.clone(),
        "-o".into(),
        opts.output_template.clone(),
        // --print 隐含 --quiet，需要显式打开进度输出。
        "--progress".into(),
        "--progress-template".into(),
        hook::PROGRESS_TEMPLATE.into(),
        "--print".into(),
        hook::AFTER_MOVE_PRINT.into(),
    ];
    if let Some(audio) = opts.post_process.as_ref() {
        args.extend([
            "-x".into(),
            "--audio-format".into(),
            audio.codec.clone(),
            "--audio-quality".into(),
            audio.quality.clone(),
        ]);
    }
    if let Some(ffmpeg) = opts.ffmpeg_location.as_ref() {
        args.extend(["--ffmpeg-location".into(), ffmpeg.clone()]);
    }
    args.push("--".into());
    args.push(url.to_string());
    args
}

type CollectedOutput = (Option<i32>, Vec<u8>, String);

fn wait_with_output_timeout(
    mut child: Child,
    timeout: Duration,
) -> Result<CollectedOutput, ExtractorError> {
    // 两个管道都要持续读取，否则输出过大时子进程会阻塞在写管道上。
    let stdout = child.stdout.take().map(|mut s| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = s.read_to_end(&mut buf);
            buf
        })
    });
    let stderr = child.stderr.take().map(|mut s| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = s.read_to_string(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            warn!(target: "extractor", secs = timeout.as_secs(), "yt-dlp 超时，终止进程");
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExtractorError::Timeout(timeout.as_secs()));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let out = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let err = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    Ok((status.code(), out, err))
}
