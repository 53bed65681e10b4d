use std::io::{BufRead, Write};

use anyhow::Result;
use tracing::warn;

use super::Console;
use crate::base_system::context::Config;
use crate::download::downloader::{BatchOptions, download_one};
use crate::download::formats::{AUDIO_ONLY_ID, BEST_MP4_SELECTOR, full_listing, render_listing};
use crate::download::plan::is_playlist;
use crate::extractor::MediaExtractor;

/// 处理一个 URL：选格式 → 确认播放列表 → 下载。所有错误只打印，不向上返回。
pub(super) fn download_media<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    config: &Config,
    extractor: &dyn MediaExtractor,
    url: &str,
) -> Result<()> {
    console.say("\nWhat do you want to download?")?;
    console.say("  1. Best Quality Video (MP4)")?;
    console.say("  2. Audio Only (MP3)")?;
    console.say("  3. Let me choose a specific format")?;
    let choice = console
        .read_line("Enter your choice (1, 2, or 3): ")?
        .unwrap_or_default();

    let format_id = match choice.as_str() {
        "1" => BEST_MP4_SELECTOR.to_string(),
        "2" => AUDIO_ONLY_ID.to_string(),
        "3" => match select_format(console, extractor, url)? {
            Some(id) => id,
            None => return Ok(()),
        },
        _ => {
            console.say("Invalid choice. Please enter 1, 2, or 3.")?;
            return Ok(());
        }
    };

    match extractor.probe(url, true) {
        Ok(info) if is_playlist(&info) && config.confirm_playlist => {
            let count = info.entries.as_ref().map_or(0, Vec::len);
            let confirm = console
                .read_line(&format!(
                    "\nThis is a playlist with {count} videos. Download all? (y/n): "
                ))?
                .unwrap_or_default();
            if !confirm.eq_ignore_ascii_case("y") {
                console.say("Aborting playlist download.")?;
                return Ok(());
            }
        }
        Ok(_) => {}
        Err(err) => {
            warn!(target: "ui", url, "预检查 URL 失败: {err}");
            console.say(&format!(
                "\nCould not verify URL. Proceeding anyway. Error: {err}"
            ))?;
        }
    }

    console.say("\nStarting download...")?;
    match download_one(
        extractor,
        config,
        url,
        &format_id,
        BatchOptions::default(),
        None,
    ) {
        Ok(report) => {
            for (_, err) in &report.failed {
                console.say(&format!("\nAn error occurred during download: {err}"))?;
            }
            for file in &report.files {
                console.say(&format!("Download finished: {}", file.display()))?;
            }
        }
        Err(err) => console.say(&format!("\nAn error occurred during download: {err:#}"))?,
    }
    Ok(())
}

fn select_format<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    extractor: &dyn MediaExtractor,
    url: &str,
) -> Result<Option<String>> {
    let info = match extractor.probe(url, false) {
        Ok(info) => info,
        Err(err) => {
            console.say(&format!("\nError fetching formats: {err}"))?;
            return Ok(None);
        }
    };

    console.say("\nAvailable Formats:")?;
    console.say(render_listing(&full_listing(&info.formats)).trim_end())?;

    let format_id = console
        .read_line(
            "Enter the format ID (e.g., '137+140' to combine best video and audio, or just one ID): ",
        )?
        .unwrap_or_default();
    if format_id.is_empty() {
        console.say("No format selected. Aborting.")?;
        return Ok(None);
    }
    Ok(Some(format_id))
}
