//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`      数据模型（FormatMenu / ProbeResult / ProgressSnapshot 等）
//! - `formats`     格式菜单整理规则
//! - `plan`        探测媒体、生成下载请求
//! - `progress`    进度上报与 CLI 进度条
//! - `downloader`  下载主流程编排

pub mod downloader;
pub mod formats;
pub mod models;
pub mod plan;
pub mod progress;

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::extractor::models::{
        DownloadOptions, DownloadOutcome, HookStatus, MediaInfo, ProgressEvent,
    };
    use crate::extractor::{ExtractorError, MediaExtractor};

    /// 不启动子进程的提取器：探测返回预设信息，下载时写出一个小文件。
    #[derive(Default)]
    pub(crate) struct FakeExtractor {
        info: MediaInfo,
        probe_error: Option<String>,
        fail_on: Option<String>,
        cancel_on: Option<String>,
        probes: Mutex<Vec<bool>>,
        downloads: Mutex<Vec<(String, DownloadOptions)>>,
    }

    impl FakeExtractor {
        pub(crate) fn with_info(info: MediaInfo) -> Self {
            Self {
                info,
                ..Self::default()
            }
        }

        pub(crate) fn failing_probe(message: &str) -> Self {
            Self {
                probe_error: Some(message.to_string()),
                ..Self::default()
            }
        }

        pub(crate) fn failing_on(mut self, needle: &str) -> Self {
            self.fail_on = Some(needle.to_string());
            self
        }

        pub(crate) fn canceling_on(mut self, needle: &str) -> Self {
            self.cancel_on = Some(needle.to_string());
            self
        }

        pub(crate) fn probe_calls(&self) -> Vec<bool> {
            self.probes.lock().unwrap().clone()
        }

        pub(crate) fn download_calls(&self) -> Vec<(String, DownloadOptions)> {
            self.downloads.lock().unwrap().clone()
        }
    }

    fn matches(needle: Option<&String>, url: &str) -> bool {
        needle.is_some_and(|n| url.ends_with(n.as_str()))
    }

    impl MediaExtractor for FakeExtractor {
        fn probe(&self, _url: &str, flat: bool) -> Result<MediaInfo, ExtractorError> {
            self.probes.lock().unwrap().push(flat);
            if let Some(msg) = self.probe_error.as_ref() {
                return Err(ExtractorError::Failed {
                    code: Some(1),
                    stderr: msg.clone(),
                });
            }
            Ok(self.info.clone())
        }

        fn download(
            &self,
            url: &str,
            opts: &DownloadOptions,
            on_progress: &mut dyn FnMut(ProgressEvent),
            cancel: Option<&AtomicBool>,
        ) -> Result<DownloadOutcome, ExtractorError> {
            self.downloads
                .lock()
                .unwrap()
                .push((url.to_string(), opts.clone()));

            if matches(self.cancel_on.as_ref(), url) {
                if let Some(flag) = cancel {
                    flag.store(true, Ordering::Relaxed);
                }
                return Err(ExtractorError::Canceled);
            }
            if matches(self.fail_on.as_ref(), url) {
                return Err(ExtractorError::Failed {
                    code: Some(1),
                    stderr: "ERROR: Video unavailable".to_string(),
                });
            }

            on_progress(ProgressEvent {
                status: HookStatus::Downloading,
                downloaded_bytes: Some(50),
                total_bytes: Some(100),
                total_bytes_estimate: None,
                filename: None,
            });

            let stem = url
                .rsplit(['=', '/'])
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("media");
            let ext = if opts.post_process.is_some() { "mp3" } else { "mp4" };
            let file = PathBuf::from(
                opts.output_template
                    .replace("%(title)s", stem)
                    .replace("%(ext)s", ext),
            );
            if let Some(parent) = file.parent()
                && parent.is_dir()
            {
                let _ = fs::write(&file, b"fake media");
            }
            on_progress(ProgressEvent::finished(file.display().to_string()));

            Ok(DownloadOutcome {
                title: Some(stem.to_string()),
                files: vec![file],
            })
        }
    }
}
