//! 外部提取器（yt-dlp）封装。
//!
//! 站点解析、分段下载、合并与转码全部交给 yt-dlp（及其调用的 ffmpeg），
//! 这里只负责：拼命令行、解析 JSON 元数据、把进度行转换为 [`ProgressEvent`]。

pub mod hook;
pub mod install;
pub mod models;
pub mod ytdlp;

use std::io;
use std::sync::atomic::AtomicBool;

pub use models::{DownloadOptions, DownloadOutcome, MediaInfo, ProgressEvent};
pub use ytdlp::YtDlp;

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("yt-dlp not found (set extractor_path in config.yml or run with --install-extractor)")]
    NotFound,
    #[error("failed to start {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: io::Error,
    },
    #[error("yt-dlp timed out after {0}s")]
    Timeout(u64),
    #[error("{}", summarize_stderr(.stderr, .code))]
    Failed { code: Option<i32>, stderr: String },
    #[error("invalid metadata from yt-dlp: {0}")]
    Json(#[from] serde_json::Error),
    #[error("download canceled")]
    Canceled,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ExtractorError {
    /// 服务端 5xx、限流、网络超时等可以重试的失败。
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractorError::Failed { stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                ["http error 5", "http error 429", "timed out", "temporary failure", "connection reset"]
                    .iter()
                    .any(|needle| lower.contains(needle))
            }
            _ => false,
        }
    }
}

/// 取最后一行 `ERROR:` 作为给用户看的错误信息。
fn summarize_stderr(stderr: &str, code: &Option<i32>) -> String {
    let line = stderr
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .map(str::trim);
    match (line, code) {
        (Some(l), _) => l.to_string(),
        (None, Some(c)) => format!("yt-dlp exited with code {c}"),
        (None, None) => "yt-dlp was terminated".to_string(),
    }
}

/// 提取器抽象：界面层与下载流程只依赖它，测试中用假实现替换。
pub trait MediaExtractor: Send + Sync {
    /// 读取媒体信息；`flat` 为 true 时只列出播放列表条目而不解析每个视频。
    fn probe(&self, url: &str, flat: bool) -> Result<MediaInfo, ExtractorError>;

    fn download(
        &self,
        url: &str,
        opts: &DownloadOptions,
        hook: &mut dyn FnMut(ProgressEvent),
        cancel: Option<&AtomicBool>,
    ) -> Result<DownloadOutcome, ExtractorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_error_shows_last_error_line() {
        let err = ExtractorError::Failed {
            code: Some(1),
            stderr: "WARNING: something\nERROR: [youtube] abc: Video unavailable\n".to_string(),
        };
        assert_eq!(err.to_string(), "ERROR: [youtube] abc: Video unavailable");
        assert!(!err.is_transient());
    }

    #[test]
    fn failed_error_without_output_shows_code() {
        let err = ExtractorError::Failed {
            code: Some(2),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "yt-dlp exited with code 2");
    }

    #[test]
    fn server_errors_are_transient() {
        let err = ExtractorError::Failed {
            code: Some(1),
            stderr: "ERROR: unable to download webpage: HTTP Error 503: Service Unavailable".to_string(),
        };
        assert!(err.is_transient());
        assert!(!ExtractorError::Timeout(5).is_transient());
    }
}
