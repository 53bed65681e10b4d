//! 下载相关的数据模型定义。
//!
//! 包含格式选项、探测结果、下载请求、进度快照与批次汇总。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::extractor::models::{FormatInfo, PlaylistEntry};

/// 一个可供用户选择的格式：`id` 交给提取器，`label` 显示给用户。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatChoice {
    pub id: String,
    #[serde(rename = "text")]
    pub label: String,
}

impl FormatChoice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// 显示名到格式标识的有序映射。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormatMenu {
    pub choices: Vec<FormatChoice>,
    #[serde(skip)]
    pub default_index: usize,
}

impl FormatMenu {
    pub fn id_for(&self, label: &str) -> Option<&str> {
        self.choices
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.id.as_str())
    }

    pub fn labels(&self) -> Vec<&str> {
        self.choices.iter().map(|c| c.label.as_str()).collect()
    }

    pub fn default_label(&self) -> Option<&str> {
        self.default_choice().map(|c| c.label.as_str())
    }

    pub fn default_choice(&self) -> Option<&FormatChoice> {
        self.choices
            .get(self.default_index)
            .or_else(|| self.choices.first())
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.choices.iter().any(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Single,
    Playlist,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub kind: MediaKind,
    pub url: String,
    pub title: String,
    pub video_id: String,
    pub choices: FormatMenu,
    pub entries: Vec<PlaylistEntry>,
    /// 单个视频的完整格式列表（播放列表为空）。
    #[serde(skip)]
    pub formats: Vec<FormatInfo>,
}

impl ProbeResult {
    pub fn is_playlist(&self) -> bool {
        self.kind == MediaKind::Playlist
    }

    /// 状态栏文案：`Video Found: <title>` / `Playlist Found: <title>`。
    pub fn headline(&self) -> String {
        match self.kind {
            MediaKind::Single => format!("Video Found: {}", self.title),
            MediaKind::Playlist => format!("Playlist Found: {}", self.title),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadItem {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: String,
    pub items: Vec<DownloadItem>,
}

impl DownloadRequest {
    /// 直接下载一个 URL（播放列表 URL 也由提取器整体处理）。
    pub fn for_url(url: impl Into<String>, format_id: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            items: vec![DownloadItem {
                id: url.clone(),
                url: url.clone(),
                title: None,
            }],
            url,
            format_id: format_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Downloading,
    PostProcessing,
    ItemDone,
    ItemFailed,
    BatchDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// 从 0 开始的当前条目序号。
    pub item_index: usize,
    pub item_total: usize,
    pub percent: Option<f64>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub phase: Phase,
}

impl ProgressSnapshot {
    pub fn new(item_total: usize) -> Self {
        Self {
            item_index: 0,
            item_total,
            percent: None,
            downloaded_bytes: None,
            total_bytes: None,
            phase: Phase::Starting,
        }
    }

    /// 进度条文字，与百分比一起显示。
    pub fn label(&self) -> String {
        let pct = self
            .percent
            .map(|p| format!("{p:.1}%"))
            .unwrap_or_else(|| "--".to_string());
        match self.phase {
            Phase::Starting => "Starting...".to_string(),
            Phase::Downloading => format!("Downloading: {pct}"),
            Phase::PostProcessing => "Download finished, now processing...".to_string(),
            Phase::ItemDone => "Done".to_string(),
            Phase::ItemFailed => "Failed".to_string(),
            Phase::BatchDone => "All downloads complete!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    /// `(条目 id, 错误信息)`
    pub failed: Vec<(String, String)>,
    pub files: Vec<PathBuf>,
    pub canceled: bool,
    pub title: Option<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.canceled
    }
}
