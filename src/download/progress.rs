//! 进度上报与 CLI 进度条管理。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::extractor::models::{HookStatus, ProgressEvent};

use super::models::{Phase, ProgressSnapshot};

pub type ProgressCallback = Box<dyn FnMut(ProgressSnapshot) + Send>;

pub(crate) struct ProgressReporter {
    pub(crate) snapshot: ProgressSnapshot,
    cb: Option<ProgressCallback>, // optional UI callback
    cli: Option<ProgressBar>,
}

impl ProgressReporter {
    /// 没有 UI 回调时（命令行）在 stderr 绘制 indicatif 进度条。
    pub(crate) fn new(item_total: usize, cb: Option<ProgressCallback>) -> Self {
        let cli = if cb.is_none() {
            let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] {wide_bar} {pos:>3}% {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
            bar.set_style(style);
            Some(bar)
        } else {
            None
        };

        let mut reporter = Self {
            snapshot: ProgressSnapshot::new(item_total),
            cb,
            cli,
        };
        reporter.emit();
        reporter
    }

    fn emit(&mut self) {
        if let Some(cb) = self.cb.as_mut() {
            cb(self.snapshot);
        }
    }

    pub(crate) fn start_item(&mut self, index: usize) {
        self.snapshot.item_index = index;
        self.snapshot.percent = None;
        self.snapshot.downloaded_bytes = None;
        self.snapshot.total_bytes = None;
        self.snapshot.phase = Phase::Starting;
        if let Some(bar) = self.cli.as_ref() {
            bar.reset();
            bar.set_position(0);
            bar.set_prefix(format!(
                "{}/{}",
                index + 1,
                self.snapshot.item_total.max(1)
            ));
            bar.set_message("");
        }
        self.emit();
    }

    pub(crate) fn on_event(&mut self, ev: &ProgressEvent) {
        match ev.status {
            HookStatus::Downloading => {
                self.snapshot.phase = Phase::Downloading;
                self.snapshot.downloaded_bytes = ev.downloaded_bytes;
                self.snapshot.total_bytes = ev.total_bytes.or(ev.total_bytes_estimate);
                if let Some(p) = ev.percent() {
                    self.snapshot.percent = Some(p);
                }
                if let (Some(bar), Some(p)) = (self.cli.as_ref(), self.snapshot.percent) {
                    bar.set_position(p as u64);
                }
            }
            // 音视频合并/转码由提取器继续完成，这里只切换阶段。
            HookStatus::Finished => {
                self.snapshot.phase = Phase::PostProcessing;
                self.snapshot.percent = Some(100.0);
                if let Some(bar) = self.cli.as_ref() {
                    bar.set_position(100);
                    bar.set_message("processing");
                }
            }
            HookStatus::Error => {
                self.snapshot.phase = Phase::ItemFailed;
            }
        }
        self.emit();
    }

    pub(crate) fn finish_item(&mut self, ok: bool) {
        self.snapshot.phase = if ok { Phase::ItemDone } else { Phase::ItemFailed };
        if ok {
            self.snapshot.percent = Some(100.0);
        }
        if let Some(bar) = self.cli.as_ref() {
            bar.set_message(if ok { "done" } else { "failed" });
        }
        self.emit();
    }

    pub(crate) fn finish_batch(&mut self) {
        self.snapshot.phase = Phase::BatchDone;
        if let Some(bar) = self.cli.take() {
            bar.finish_and_clear();
        }
        self.emit();
    }
}
