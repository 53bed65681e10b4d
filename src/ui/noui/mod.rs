//! 无 UI（逐行提问的 CLI）交互入口。
//!
//! 使用标准输入输出进行交互，并在进入前尽量恢复终端模式。

use std::io::{self, BufRead, Write};

use anyhow::{Result, anyhow};

use crossterm::event::DisableMouseCapture;
use crossterm::execute;
use crossterm::terminal::{LeaveAlternateScreen, disable_raw_mode};

use crate::base_system::context::Config;
use crate::base_system::media_url::normalize_url;
use crate::download::downloader::{BatchOptions, download_one};
use crate::download::formats::{AUDIO_ONLY_ID, BEST_MP4_SELECTOR};
use crate::download::models::BatchReport;
use crate::extractor::MediaExtractor;

mod download;

/// Ctrl+C 时由日志系统的信号处理器打印。
pub const INTERRUPT_MESSAGE: &str = "Exiting gracefully.\n\nGoodbye!";

/// 带提示的逐行输入；测试中用内存缓冲替代标准输入输出。
pub(crate) struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub(crate) fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// 读取一行；输入流结束（EOF）时返回 None。
    pub(crate) fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush().ok();
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    pub(crate) fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}")?;
        Ok(())
    }
}

pub fn run(config: &Config, extractor: &dyn MediaExtractor) -> Result<()> {
    // 上一次可能在 TUI raw mode 中退出（例如 Ctrl+C），先尽量恢复终端以便按行读取。
    let _ = disable_raw_mode();
    let mut out = io::stdout();
    let _ = execute!(out, DisableMouseCapture, LeaveAlternateScreen);

    let stdin = io::stdin();
    let mut console = Console::new(stdin.lock(), io::stdout());
    run_loop(&mut console, config, extractor)
}

pub(crate) fn run_loop<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    config: &Config,
    extractor: &dyn MediaExtractor,
) -> Result<()> {
    console.say(&format!(
        "--- media-grab v{} ---\nFiles are saved to {}",
        env!("CARGO_PKG_VERSION"),
        config.default_save_dir().display()
    ))?;

    loop {
        let Some(input) =
            console.read_line("\nEnter the video or playlist URL (or 'q' to quit): ")?
        else {
            break;
        };
        if input.eq_ignore_ascii_case("q") {
            break;
        }
        if input.is_empty() {
            continue;
        }
        let Some(url) = normalize_url(&input) else {
            console.say("That does not look like a URL.")?;
            continue;
        };

        download::download_media(console, config, extractor, &url)?;

        let another = console.read_line("\nDownload another? (y/n): ")?;
        if !another.is_some_and(|a| a.eq_ignore_ascii_case("y")) {
            break;
        }
    }

    console.say("\nGoodbye!")?;
    Ok(())
}

/// 命令行参数 `--url` 给出时的一次性下载，不做任何提问。
pub fn run_once(
    config: &Config,
    extractor: &dyn MediaExtractor,
    url: &str,
    format: Option<&str>,
    audio: bool,
) -> Result<BatchReport> {
    let url = normalize_url(url).ok_or_else(|| anyhow!("invalid URL: {url}"))?;
    let format_id = if audio {
        AUDIO_ONLY_ID
    } else {
        format
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(BEST_MP4_SELECTOR)
    };
    let report = download_one(
        extractor,
        config,
        &url,
        format_id,
        BatchOptions::default(),
        None,
    )?;
    if let Some((_, err)) = report.failed.first() {
        return Err(anyhow!("An error occurred during download: {err}"));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::download::test_support::FakeExtractor;
    use crate::extractor::models::MediaInfo;

    fn config_in(dir: &tempfile::TempDir) -> Config {
        Config {
            save_path: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        }
    }

    fn run_script(script: &str, fake: &FakeExtractor, cfg: &Config) -> String {
        let mut out = Vec::new();
        {
            let mut console = Console::new(Cursor::new(script.as_bytes().to_vec()), &mut out);
            run_loop(&mut console, cfg, fake).unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn quit_prints_goodbye() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeExtractor::with_info(MediaInfo::default());
        let out = run_script("\nq\n", &fake, &config_in(&dir));
        assert!(out.ends_with("Goodbye!\n"));
        assert!(fake.download_calls().is_empty());
    }

    #[test]
    fn end_of_input_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeExtractor::with_info(MediaInfo::default());
        let out = run_script("", &fake, &config_in(&dir));
        assert!(out.contains("Goodbye!"));
    }

    #[test]
    fn non_url_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeExtractor::with_info(MediaInfo::default());
        let out = run_script("hello there\nq\n", &fake, &config_in(&dir));
        assert!(out.contains("That does not look like a URL."));
    }

    #[test]
    fn run_once_prefers_audio_flag() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeExtractor::with_info(MediaInfo::default());
        let report = run_once(&config_in(&dir), &fake, "youtu.be/abc", Some("18"), true).unwrap();
        assert_eq!(report.succeeded, 1);
        let calls = fake.download_calls();
        assert_eq!(calls[0].0, "https://youtu.be/abc");
        assert_eq!(calls[0].1.format, AUDIO_ONLY_ID);
    }

    #[test]
    fn run_once_surfaces_item_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeExtractor::with_info(MediaInfo::default()).failing_on("abc");
        let err = run_once(&config_in(&dir), &fake, "https://youtu.be/abc", None, false)
            .unwrap_err();
        assert!(err.to_string().contains("Video unavailable"));
        assert_eq!(fake.download_calls()[0].1.format, BEST_MP4_SELECTOR);
    }
}
