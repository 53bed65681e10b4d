//! 格式菜单整理规则。

use std::collections::HashSet;

use crate::base_system::context::Config;
use crate::extractor::models::{AudioExtract, DownloadOptions, FormatInfo};

use super::models::{FormatChoice, FormatMenu};

pub const AUDIO_ONLY_ID: &str = "bestaudio/best";
pub const AUDIO_ONLY_LABEL: &str = "Audio Only (Best Quality MP3)";
pub const BEST_MP4_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

const PLAYLIST_HEIGHTS: [u32; 2] = [720, 480];
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn audio_choice() -> FormatChoice {
    FormatChoice::new(AUDIO_ONLY_ID, AUDIO_ONLY_LABEL)
}

/// 单个视频的精简菜单：仅音频在前，其后每个目标高度一个音视频合一的 MP4。
pub fn curated_menu(formats: &[FormatInfo], heights: &[u32]) -> FormatMenu {
    let mut choices = vec![audio_choice()];
    let mut seen = HashSet::new();

    for f in formats {
        if f.ext != "mp4" || !f.has_video() || !f.has_audio() {
            continue;
        }
        let Some(height) = f.height else {
            continue;
        };
        if !heights.contains(&height) || !seen.insert(height) {
            continue;
        }
        let size = match f.size_bytes() {
            Some(bytes) => format!("{:.2} MB", bytes as f64 / BYTES_PER_MB),
            None => "Unknown size".to_string(),
        };
        choices.push(FormatChoice::new(
            f.format_id.clone(),
            format!("{height}p - MP4 ({size})"),
        ));
    }

    FormatMenu {
        choices,
        default_index: 0,
    }
}

pub fn height_selector(height: u32) -> String {
    format!("bestvideo[height<={height}][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best")
}

/// 播放列表菜单：各条目格式不同，只能给出通用选择器。默认 720p。
pub fn playlist_menu() -> FormatMenu {
    let mut choices = vec![audio_choice()];
    for h in PLAYLIST_HEIGHTS {
        choices.push(FormatChoice::new(
            height_selector(h),
            format!("Video - {h}p (MP4)"),
        ));
    }
    FormatMenu {
        choices,
        default_index: 1,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub id: String,
    pub ext: String,
    pub resolution: String,
    pub size_mb: f64,
}

/// 命令行“手动选择格式”时打印的完整列表，只保留报告了大小的格式。
pub fn full_listing(formats: &[FormatInfo]) -> Vec<ListingRow> {
    formats
        .iter()
        .filter_map(|f| {
            let bytes = f.size_bytes()?;
            Some(ListingRow {
                id: f.format_id.clone(),
                ext: f.ext.clone(),
                resolution: f
                    .resolution
                    .clone()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "audio only".to_string()),
                size_mb: bytes as f64 / BYTES_PER_MB,
            })
        })
        .collect()
}

pub fn render_listing(rows: &[ListingRow]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<10} {:<6} {:<12} {:>10}\n",
        "ID", "Ext", "Resolution", "Size (MB)"
    ));
    out.push_str(&format!("{}\n", "-".repeat(41)));
    for row in rows {
        out.push_str(&format!(
            "{:<10} {:<6} {:<12} {:>10.2}\n",
            row.id, row.ext, row.resolution, row.size_mb
        ));
    }
    out
}

pub fn needs_audio_extract(format_id: &str) -> bool {
    format_id == AUDIO_ONLY_ID
}

pub fn download_options(cfg: &Config, format_id: &str) -> DownloadOptions {
    let post_process = needs_audio_extract(format_id).then(|| AudioExtract {
        codec: cfg.audio_codec.trim().to_string(),
        quality: cfg.audio_quality.trim().to_string(),
    });
    DownloadOptions {
        format: format_id.to_string(),
        output_template: cfg.output_template_path(),
        post_process,
        ffmpeg_location: cfg.ffmpeg_override(),
    }
}
