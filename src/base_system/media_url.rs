//! 媒体链接解析与规范化。

use regex::Regex;
use std::sync::OnceLock;

use crate::extractor::models::PlaylistEntry;

static RE_URL: OnceLock<Regex> = OnceLock::new();
static RE_BARE_HOST: OnceLock<Regex> = OnceLock::new();

fn re_url() -> &'static Regex {
    RE_URL.get_or_init(|| Regex::new(r"https?://\S+").expect("compile RE_URL"))
}

fn re_bare_host() -> &'static Regex {
    RE_BARE_HOST.get_or_init(|| {
        Regex::new(r"^(?i)(www\.|m\.|music\.)?[a-z0-9-]+(\.[a-z0-9-]+)*\.[a-z]{2,}/\S*$")
            .expect("compile RE_BARE_HOST")
    })
}

/// 从用户输入中取出可交给提取器的 URL。
///
/// 粘贴的文本里夹带其它内容时，取第一个 http(s) 链接；没有协议头但形如
/// `youtu.be/xxx` 的输入补上 `https://`。其它输入返回 None。
pub fn normalize_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(m) = re_url().find(trimmed) {
        let url = m
            .as_str()
            .trim_end_matches(|c: char| matches!(c, ')' | ']' | '>' | '"' | '\'' | ',' | '。'));
        return Some(url.to_string());
    }

    if re_bare_host().is_match(trimmed) {
        return Some(format!("https://{trimmed}"));
    }

    None
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// 播放列表条目的下载地址：条目自带的绝对 URL 优先，否则按视频 ID 拼接。
pub fn entry_url(entry: &PlaylistEntry) -> String {
    match entry.url.as_deref() {
        Some(u) if u.starts_with("http://") || u.starts_with("https://") => u.to_string(),
        _ => watch_url(&entry.id),
    }
}
