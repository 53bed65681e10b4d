//! 提取器（yt-dlp）侧的数据模型。
//!
//! 字段名与 yt-dlp `--dump-single-json` 输出保持一致，未知字段忽略。

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub extractor_key: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
    #[serde(default)]
    pub entries: Option<Vec<PlaylistEntry>>,
}

impl MediaInfo {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown")
    }

    pub fn has_entries(&self) -> bool {
        self.entries.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub height: Option<u32>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub format_note: Option<String>,
}

// 部分提取器把大小、高度输出成浮点数（如 1234.5、720.0），甚至字符串。
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as u64)
        }),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64),
        _ => None,
    })
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_u64(deserializer)?.and_then(|v| u32::try_from(v).ok()))
}

impl FormatInfo {
    /// 精确大小优先，其次估算值；两者都没有或为 0 时返回 None。
    pub fn size_bytes(&self) -> Option<u64> {
        self.filesize
            .filter(|s| *s > 0)
            .or(self.filesize_approx.filter(|s| *s > 0))
    }

    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }
}

// yt-dlp 用字符串 "none" 表示缺失的流；字段缺失时视为存在（与原逻辑 `!= "none"` 一致）。
fn codec_present(codec: Option<&str>) -> bool {
    codec != Some("none")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl PlaylistEntry {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown Title")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Downloading,
    Finished,
    Error,
}

/// 提取器下载过程中的一次进度回调。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub status: HookStatus,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    pub filename: Option<String>,
}

impl ProgressEvent {
    /// 已下载百分比；总大小未知（或为 0）时返回 None。
    pub fn percent(&self) -> Option<f64> {
        let total = self
            .total_bytes
            .filter(|t| *t > 0)
            .or(self.total_bytes_estimate.filter(|t| *t > 0))?;
        let done = self.downloaded_bytes?;
        Some((done as f64 / total as f64 * 100.0).min(100.0))
    }

    pub fn finished(filename: impl Into<String>) -> Self {
        Self {
            status: HookStatus::Finished,
            downloaded_bytes: None,
            total_bytes: None,
            total_bytes_estimate: None,
            filename: Some(filename.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioExtract {
    pub codec: String,
    pub quality: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    pub format: String,
    pub output_template: String,
    pub post_process: Option<AudioExtract>,
    pub ffmpeg_location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadOutcome {
    pub title: Option<String>,
    pub files: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dump_json_subset() {
        let raw = r#"{
            "id": "abc",
            "title": "Clip",
            "extractor_key": "Youtube",
            "formats": [
                {"format_id": "18", "ext": "mp4", "height": 360, "vcodec": "avc1", "acodec": "mp4a", "filesize": 1048576},
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a", "filesize_approx": 2048},
                {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none"}
            ],
            "thumbnails": []
        }"#;
        let info: MediaInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.display_title(), "Clip");
        assert!(!info.has_entries());
        assert_eq!(info.formats.len(), 3);
        assert!(info.formats[0].has_video() && info.formats[0].has_audio());
        assert!(!info.formats[1].has_video());
        assert_eq!(info.formats[1].size_bytes(), Some(2048));
        assert_eq!(info.formats[2].size_bytes(), None);
    }

    #[test]
    fn fractional_sizes_and_heights_are_accepted() {
        let raw = r#"{
            "id": "abc",
            "formats": [
                {"format_id": "hls-720", "ext": "mp4", "height": 720.0, "filesize_approx": 1234.5},
                {"format_id": "dash", "ext": "mp4", "height": null, "filesize": "2048"},
                {"format_id": "odd", "ext": "mp4", "height": -1.0, "filesize": true}
            ]
        }"#;
        let info: MediaInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.formats[0].height, Some(720));
        assert_eq!(info.formats[0].size_bytes(), Some(1234));
        assert_eq!(info.formats[1].height, None);
        assert_eq!(info.formats[1].size_bytes(), Some(2048));
        assert_eq!(info.formats[2].height, None);
        assert_eq!(info.formats[2].size_bytes(), None);
    }

    #[test]
    fn flat_playlist_entries_parse() {
        let raw = r#"{"id": "PL1", "title": "Mix", "extractor_key": "YoutubeTab",
            "entries": [{"id": "a", "title": "First", "url": "https://www.youtube.com/watch?v=a"}, {"id": "b"}]}"#;
        let info: MediaInfo = serde_json::from_str(raw).unwrap();
        let entries = info.entries.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].display_title(), "Unknown Title");
    }

    #[test]
    fn percent_uses_estimate_when_total_missing() {
        let ev = ProgressEvent {
            status: HookStatus::Downloading,
            downloaded_bytes: Some(50),
            total_bytes: None,
            total_bytes_estimate: Some(200),
            filename: None,
        };
        assert_eq!(ev.percent(), Some(25.0));
    }

    #[test]
    fn percent_is_none_without_total() {
        let ev = ProgressEvent {
            status: HookStatus::Downloading,
            downloaded_bytes: Some(50),
            total_bytes: Some(0),
            total_bytes_estimate: None,
            filename: None,
        };
        assert_eq!(ev.percent(), None);
    }
}
