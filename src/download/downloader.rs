//! 下载主流程编排：逐个条目调用提取器，汇总结果。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::base_system::context::Config;
use crate::extractor::{ExtractorError, MediaExtractor};

use super::formats::download_options;
use super::models::{BatchReport, DownloadRequest};
use super::progress::{ProgressCallback, ProgressReporter};

/// 条目级通知，界面据此显示“第 i 个 / 共 n 个”、完成文件和失败原因。
#[derive(Debug, Clone, PartialEq)]
pub enum ItemNotice {
    Started {
        index: usize,
        total: usize,
        title: Option<String>,
    },
    Finished {
        index: usize,
        files: Vec<PathBuf>,
    },
    Failed {
        index: usize,
        id: String,
        error: String,
    },
}

impl ItemNotice {
    pub fn message(&self) -> String {
        match self {
            ItemNotice::Started { index, total, .. } => {
                format!("Downloading video {} of {}...", index + 1, total)
            }
            ItemNotice::Finished { files, .. } => {
                let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
                if names.is_empty() {
                    "Download finished.".to_string()
                } else {
                    format!("Download finished: {}", names.join(", "))
                }
            }
            ItemNotice::Failed { id, error, .. } => format!("Failed to download {id}: {error}"),
        }
    }
}

pub type ItemCallback = Box<dyn FnMut(ItemNotice) + Send>;

#[derive(Default)]
pub struct BatchOptions {
    /// 为 None 时在终端绘制进度条。
    pub progress: Option<ProgressCallback>,
    pub on_item: Option<ItemCallback>,
}

fn is_canceled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|c| c.load(Ordering::Relaxed))
}

/// 顺序下载请求中的所有条目。单个条目失败只记录，不中断批次；取消则立即停止。
pub fn download_batch(
    extractor: &dyn MediaExtractor,
    cfg: &Config,
    request: &DownloadRequest,
    options: BatchOptions,
    cancel: Option<&AtomicBool>,
) -> Result<BatchReport> {
    let save_dir = cfg
        .ensure_save_dir()
        .with_context(|| format!("create save dir {}", cfg.default_save_dir().display()))?;

    let total = request.items.len();
    let opts = download_options(cfg, &request.format_id);
    info!(
        target: "download",
        total,
        format = %request.format_id,
        dir = %save_dir.display(),
        "开始下载"
    );

    let BatchOptions { progress, mut on_item } = options;
    let mut reporter = ProgressReporter::new(total, progress);
    let mut notify = |notice: ItemNotice| {
        if let Some(cb) = on_item.as_mut() {
            cb(notice);
        }
    };

    let start = Instant::now();
    let mut report = BatchReport::default();

    for (index, item) in request.items.iter().enumerate() {
        if is_canceled(cancel) {
            info!(target: "download", "收到停止信号，结束任务");
            report.canceled = true;
            break;
        }

        reporter.start_item(index);
        notify(ItemNotice::Started {
            index,
            total,
            title: item.title.clone(),
        });

        let result = extractor.download(
            &item.url,
            &opts,
            &mut |ev| reporter.on_event(&ev),
            cancel,
        );

        match result {
            Ok(outcome) => {
                reporter.finish_item(true);
                report.succeeded += 1;
                if report.title.is_none() {
                    report.title = item.title.clone().or(outcome.title.clone());
                }
                info!(target: "download", id = %item.id, files = outcome.files.len(), "条目下载完成");
                notify(ItemNotice::Finished {
                    index,
                    files: outcome.files.clone(),
                });
                report.files.extend(outcome.files);
            }
            Err(ExtractorError::Canceled) => {
                reporter.finish_item(false);
                warn!(target: "download", id = %item.id, "下载已取消");
                report.canceled = true;
                break;
            }
            Err(err) => {
                reporter.finish_item(false);
                let message = err.to_string();
                error!(target: "download", id = %item.id, "下载失败: {message}");
                notify(ItemNotice::Failed {
                    index,
                    id: item.id.clone(),
                    error: message.clone(),
                });
                report.failed.push((item.id.clone(), message));
            }
        }
    }

    reporter.finish_batch();
    info!(
        target: "download",
        "下载结束：成功 {} 个，失败 {} 个，用时 {:.1}s",
        report.succeeded,
        report.failed.len(),
        start.elapsed().as_secs_f32()
    );
    Ok(report)
}

/// 直接下载单个 URL（命令行与 Web 表单使用）。
pub fn download_one(
    extractor: &dyn MediaExtractor,
    cfg: &Config,
    url: &str,
    format_id: &str,
    options: BatchOptions,
    cancel: Option<&AtomicBool>,
) -> Result<BatchReport> {
    let request = DownloadRequest::for_url(url.trim(), format_id);
    download_batch(extractor, cfg, &request, options, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::download::formats::AUDIO_ONLY_ID;
    use crate::download::models::{DownloadItem, Phase, ProgressSnapshot};
    use crate::download::test_support::FakeExtractor;
    use crate::extractor::models::MediaInfo;

    fn temp_config(dir: &tempfile::TempDir) -> Config {
        Config {
            save_path: dir.path().join("out").to_string_lossy().into_owned(),
            ..Config::default()
        }
    }

    fn item(id: &str) -> DownloadItem {
        DownloadItem {
            id: id.to_string(),
            url: format!("https://www.youtube.com/watch?v={id}"),
            title: Some(format!("Title {id}")),
        }
    }

    fn request(ids: &[&str]) -> DownloadRequest {
        DownloadRequest {
            url: "https://www.youtube.com/playlist?list=PL1".to_string(),
            format_id: AUDIO_ONLY_ID.to_string(),
            items: ids.iter().map(|id| item(id)).collect(),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<ItemNotice>>>, BatchOptions, Arc<Mutex<Vec<ProgressSnapshot>>>) {
        let notices = Arc::new(Mutex::new(Vec::new()));
        let snaps = Arc::new(Mutex::new(Vec::new()));
        let n = Arc::clone(&notices);
        let s = Arc::clone(&snaps);
        let options = BatchOptions {
            progress: Some(Box::new(move |snap| s.lock().unwrap().push(snap))),
            on_item: Some(Box::new(move |notice| n.lock().unwrap().push(notice))),
        };
        (notices, options, snaps)
    }

    #[test]
    fn batch_continues_after_item_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = temp_config(&dir);
        let fake = FakeExtractor::with_info(MediaInfo::default()).failing_on("b");
        let (notices, options, snaps) = recorder();

        let report = download_batch(&fake, &cfg, &request(&["a", "b", "c"]), options, None).unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert_eq!(report.files.len(), 2);
        assert!(!report.canceled);
        assert!(dir.path().join("out").is_dir());

        let messages: Vec<String> = notices.lock().unwrap().iter().map(ItemNotice::message).collect();
        assert_eq!(messages[0], "Downloading video 1 of 3...");
        assert!(messages.iter().any(|m| m.starts_with("Failed to download b: ")));
        assert_eq!(snaps.lock().unwrap().last().map(|s| s.phase), Some(Phase::BatchDone));
    }

    #[test]
    fn audio_format_requests_post_processing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = temp_config(&dir);
        let fake = FakeExtractor::with_info(MediaInfo::default());
        let (_n, options, _s) = recorder();
        download_batch(&fake, &cfg, &request(&["a"]), options, None).unwrap();

        let calls = fake.download_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.format, AUDIO_ONLY_ID);
        assert!(calls[0].1.post_process.is_some());
    }

    #[test]
    fn cancel_stops_remaining_items() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = temp_config(&dir);
        let fake = FakeExtractor::with_info(MediaInfo::default()).canceling_on("b");
        let cancel = AtomicBool::new(false);
        let (_n, options, _s) = recorder();

        let report =
            download_batch(&fake, &cfg, &request(&["a", "b", "c"]), options, Some(&cancel)).unwrap();

        assert!(report.canceled);
        assert_eq!(report.succeeded, 1);
        assert!(report.failed.is_empty());
        assert_eq!(fake.download_calls().len(), 2);
        assert!(!report.is_success());
    }

    #[test]
    fn pre_canceled_batch_downloads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = temp_config(&dir);
        let fake = FakeExtractor::with_info(MediaInfo::default());
        let cancel = AtomicBool::new(true);
        let report = download_one(
            &fake,
            &cfg,
            "https://youtu.be/a",
            "18",
            BatchOptions::default(),
            Some(&cancel),
        )
        .unwrap();
        assert!(report.canceled);
        assert!(fake.download_calls().is_empty());
    }

    #[test]
    fn download_one_reports_title_from_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = temp_config(&dir);
        let fake = FakeExtractor::with_info(MediaInfo::default());
        let (_n, options, _s) = recorder();
        let report = download_one(&fake, &cfg, " https://youtu.be/a ", "18", options, None).unwrap();
        assert!(report.is_success());
        assert_eq!(fake.download_calls()[0].0, "https://youtu.be/a");
        assert!(report.title.is_some());
    }
}
