//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 程序配置
    #[serde(default = "default_false")]
    pub classic_cli: bool,

    // 保存配置
    #[serde(default = "default_save_path")]
    pub save_path: String,
    #[serde(default = "default_output_template")]
    pub output_template: String,

    // 提取器配置
    #[serde(default)]
    pub extractor_path: String,
    #[serde(default)]
    pub ffmpeg_location: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    // 后处理配置
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_quality")]
    pub audio_quality: String,

    // 格式菜单
    #[serde(default = "default_target_heights")]
    pub target_heights: Vec<u32>,
    #[serde(default = "default_true")]
    pub confirm_playlist: bool,

    // Web 配置
    #[serde(default = "default_web_bind")]
    pub web_bind: String,

    #[serde(skip)]
    pub(crate) data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            classic_cli: default_false(),
            save_path: default_save_path(),
            output_template: default_output_template(),
            extractor_path: String::new(),
            ffmpeg_location: String::new(),
            probe_timeout: default_probe_timeout(),
            max_retries: default_max_retries(),
            audio_codec: default_audio_codec(),
            audio_quality: default_audio_quality(),
            target_heights: default_target_heights(),
            confirm_playlist: default_true(),
            web_bind: default_web_bind(),
            data_dir: None,
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 12] = [
            FieldMeta {
                name: "classic_cli",
                description: "是否使用逐行提问的命令行界面（false 时使用 TUI）",
            },
            FieldMeta {
                name: "save_path",
                description: "下载保存目录（相对路径以当前工作目录为基准）",
            },
            FieldMeta {
                name: "output_template",
                description: "yt-dlp 输出文件名模板，位于保存目录之下",
            },
            FieldMeta {
                name: "extractor_path",
                description: "yt-dlp 可执行文件路径；留空则在 PATH 与数据目录 bin/ 中查找",
            },
            FieldMeta {
                name: "ffmpeg_location",
                description: "ffmpeg 所在路径（传给 --ffmpeg-location）；留空使用系统默认",
            },
            FieldMeta {
                name: "probe_timeout",
                description: "读取媒体信息的超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "读取媒体信息遇到临时错误时的额外重试次数",
            },
            FieldMeta {
                name: "audio_codec",
                description: "仅音频下载时转码的目标格式",
            },
            FieldMeta {
                name: "audio_quality",
                description: "仅音频下载时的转码质量（kbps 或 0-10）",
            },
            FieldMeta {
                name: "target_heights",
                description: "格式菜单中列出的 MP4 分辨率（高度）",
            },
            FieldMeta {
                name: "confirm_playlist",
                description: "命令行模式下载整个播放列表前是否确认",
            },
            FieldMeta {
                name: "web_bind",
                description: "Web 模式监听地址（可被 MEDIA_GRAB_WEB_ADDR 覆盖）",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.output_template.trim().is_empty() {
            return Err(ConfigError::Validation(
                "output_template must not be empty".to_string(),
            ));
        }
        let template = Path::new(self.output_template.trim());
        if template.is_absolute() {
            return Err(ConfigError::Validation(
                "output_template must be relative to save_path".to_string(),
            ));
        }
        if template.components().any(|c| c == Component::ParentDir) {
            return Err(ConfigError::Validation(
                "output_template must not leave save_path ('..' is not allowed)".to_string(),
            ));
        }
        if self.audio_codec.trim().is_empty() {
            return Err(ConfigError::Validation(
                "audio_codec must not be empty".to_string(),
            ));
        }
        if self.probe_timeout == 0 {
            return Err(ConfigError::Validation(
                "probe_timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            PathBuf::from(default_save_path())
        } else {
            PathBuf::from(self.save_path.trim())
        }
    }

    pub fn ensure_save_dir(&self) -> io::Result<PathBuf> {
        let dir = self.default_save_dir();
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// 交给 yt-dlp 的 `-o` 参数：保存目录 + 文件名模板。
    pub fn output_template_path(&self) -> String {
        self.default_save_dir()
            .join(self.output_template.trim())
            .to_string_lossy()
            .into_owned()
    }

    /// `--data-dir` 指定的目录（存放 config.yml、logs、bin/）。
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn set_data_dir(&mut self, dir: Option<&Path>) {
        self.data_dir = dir.map(Path::to_path_buf);
    }

    pub fn extractor_override(&self) -> Option<PathBuf> {
        let raw = self.extractor_path.trim();
        (!raw.is_empty()).then(|| PathBuf::from(raw))
    }

    pub fn ffmpeg_override(&self) -> Option<String> {
        let raw = self.ffmpeg_location.trim();
        (!raw.is_empty()).then(|| raw.to_string())
    }
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_save_path() -> String {
    "downloads".to_string()
}

fn default_output_template() -> String {
    "%(title)s.%(ext)s".to_string()
}

fn default_probe_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_audio_codec() -> String {
    "mp3".to_string()
}

fn default_audio_quality() -> String {
    "192".to_string()
}

fn default_target_heights() -> Vec<u32> {
    vec![1080, 720, 480, 360]
}

fn default_web_bind() -> String {
    "127.0.0.1:5000".to_string()
}
