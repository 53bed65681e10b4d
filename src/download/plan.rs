//! 探测媒体并生成格式菜单与下载请求。

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::base_system::context::Config;
use crate::base_system::media_url;
use crate::extractor::MediaExtractor;
use crate::extractor::models::MediaInfo;

use super::formats::{curated_menu, playlist_menu};
use super::models::{DownloadItem, DownloadRequest, MediaKind, ProbeResult};

/// YouTube 单视频的提取器标识；它的扁平结果带 entries 时也不算播放列表。
const SINGLE_VIDEO_EXTRACTOR: &str = "Youtube";

pub fn is_playlist(info: &MediaInfo) -> bool {
    info.has_entries() && info.extractor_key.as_deref() != Some(SINGLE_VIDEO_EXTRACTOR)
}

/// 先做扁平探测判断是否播放列表；单个视频再做一次完整探测拿到格式列表。
pub fn probe_media(
    extractor: &dyn MediaExtractor,
    cfg: &Config,
    url: &str,
) -> Result<ProbeResult> {
    let url = url.trim();
    if url.is_empty() {
        return Err(anyhow!("URL is required."));
    }

    info!(target: "download", url, "Analyzing URL...");
    let flat = extractor
        .probe(url, true)
        .with_context(|| format!("probe {url}"))?;

    if is_playlist(&flat) {
        let entries = flat.entries.clone().unwrap_or_default();
        info!(
            target: "download",
            title = flat.display_title(),
            count = entries.len(),
            "识别为播放列表"
        );
        return Ok(ProbeResult {
            kind: MediaKind::Playlist,
            url: url.to_string(),
            title: flat.display_title().to_string(),
            video_id: flat.id.clone(),
            choices: playlist_menu(),
            entries,
            formats: Vec::new(),
        });
    }

    let full = extractor
        .probe(url, false)
        .with_context(|| format!("probe {url}"))?;
    let choices = curated_menu(&full.formats, &cfg.target_heights);
    debug!(
        target: "download",
        formats = full.formats.len(),
        offered = choices.len(),
        "格式菜单已生成"
    );

    Ok(ProbeResult {
        kind: MediaKind::Single,
        url: url.to_string(),
        title: full.display_title().to_string(),
        video_id: full.id.clone(),
        choices,
        entries: Vec::new(),
        formats: full.formats,
    })
}

pub fn single_request(probe: &ProbeResult, format_id: &str) -> Result<DownloadRequest> {
    if format_id.trim().is_empty() {
        return Err(anyhow!("Please select a valid quality."));
    }
    // 单个视频直接用用户给出的 URL，非 YouTube 站点也能下载。
    let id = if probe.video_id.is_empty() {
        probe.url.clone()
    } else {
        probe.video_id.clone()
    };
    Ok(DownloadRequest {
        url: probe.url.clone(),
        format_id: format_id.to_string(),
        items: vec![DownloadItem {
            id,
            url: probe.url.clone(),
            title: Some(probe.title.clone()),
        }],
    })
}

/// 按勾选的条目 id 生成请求，保持播放列表原有顺序。
pub fn playlist_request(
    probe: &ProbeResult,
    selected_ids: &[String],
    format_id: &str,
) -> Result<DownloadRequest> {
    if format_id.trim().is_empty() {
        return Err(anyhow!("Please select a valid quality."));
    }
    let items: Vec<DownloadItem> = probe
        .entries
        .iter()
        .filter(|e| selected_ids.iter().any(|id| *id == e.id))
        .map(|e| DownloadItem {
            id: e.id.clone(),
            url: media_url::entry_url(e),
            title: e.title.clone(),
        })
        .collect();
    if items.is_empty() {
        return Err(anyhow!("Please select at least one video from the playlist."));
    }
    Ok(DownloadRequest {
        url: probe.url.clone(),
        format_id: format_id.to_string(),
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::formats::AUDIO_ONLY_ID;
    use crate::download::test_support::FakeExtractor;
    use crate::extractor::models::{FormatInfo, PlaylistEntry};

    fn video_info() -> MediaInfo {
        MediaInfo {
            id: "abc".to_string(),
            title: Some("Clip".to_string()),
            extractor_key: Some("Youtube".to_string()),
            formats: vec![FormatInfo {
                format_id: "22".to_string(),
                ext: "mp4".to_string(),
                height: Some(720),
                vcodec: Some("avc1".to_string()),
                acodec: Some("mp4a".to_string()),
                ..FormatInfo::default()
            }],
            ..MediaInfo::default()
        }
    }

    fn playlist_info() -> MediaInfo {
        MediaInfo {
            id: "PL1".to_string(),
            title: Some("Mix".to_string()),
            extractor_key: Some("YoutubeTab".to_string()),
            entries: Some(vec![
                PlaylistEntry {
                    id: "a".to_string(),
                    title: Some("First".to_string()),
                    url: None,
                },
                PlaylistEntry {
                    id: "b".to_string(),
                    title: Some("Second".to_string()),
                    url: Some("https://www.youtube.com/watch?v=b".to_string()),
                },
            ]),
            ..MediaInfo::default()
        }
    }

    #[test]
    fn single_video_gets_curated_menu() {
        let fake = FakeExtractor::with_info(video_info());
        let probe = probe_media(&fake, &Config::default(), " https://youtu.be/abc ").unwrap();
        assert_eq!(probe.kind, MediaKind::Single);
        assert_eq!(probe.url, "https://youtu.be/abc");
        assert_eq!(probe.headline(), "Video Found: Clip");
        assert_eq!(probe.choices.len(), 2);
        assert_eq!(fake.probe_calls(), vec![true, false]);
    }

    #[test]
    fn youtube_entries_are_not_a_playlist() {
        let mut info = video_info();
        info.entries = Some(Vec::new());
        assert!(!is_playlist(&info));
        assert!(is_playlist(&playlist_info()));
    }

    #[test]
    fn playlist_skips_full_probe() {
        let fake = FakeExtractor::with_info(playlist_info());
        let probe = probe_media(&fake, &Config::default(), "https://youtube.com/playlist?list=PL1")
            .unwrap();
        assert!(probe.is_playlist());
        assert_eq!(probe.headline(), "Playlist Found: Mix");
        assert_eq!(probe.entries.len(), 2);
        assert_eq!(probe.choices.default_label(), Some("Video - 720p (MP4)"));
        assert_eq!(fake.probe_calls(), vec![true]);
    }

    #[test]
    fn empty_url_is_rejected() {
        let fake = FakeExtractor::with_info(video_info());
        let err = probe_media(&fake, &Config::default(), "   ").unwrap_err();
        assert_eq!(err.to_string(), "URL is required.");
        assert!(fake.probe_calls().is_empty());
    }

    #[test]
    fn playlist_request_keeps_order_and_resolves_urls() {
        let fake = FakeExtractor::with_info(playlist_info());
        let probe = probe_media(&fake, &Config::default(), "https://x/list").unwrap();
        let req = playlist_request(
            &probe,
            &["b".to_string(), "a".to_string()],
            AUDIO_ONLY_ID,
        )
        .unwrap();
        let urls: Vec<&str> = req.items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.youtube.com/watch?v=a",
                "https://www.youtube.com/watch?v=b"
            ]
        );
    }

    #[test]
    fn playlist_request_requires_selection() {
        let fake = FakeExtractor::with_info(playlist_info());
        let probe = probe_media(&fake, &Config::default(), "https://x/list").unwrap();
        let err = playlist_request(&probe, &[], AUDIO_ONLY_ID).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Please select at least one video from the playlist."
        );
    }

    #[test]
    fn single_request_requires_format() {
        let fake = FakeExtractor::with_info(video_info());
        let probe = probe_media(&fake, &Config::default(), "https://youtu.be/abc").unwrap();
        assert!(single_request(&probe, "").is_err());
        let req = single_request(&probe, "22").unwrap();
        assert_eq!(req.items.len(), 1);
        assert_eq!(req.items[0].id, "abc");
        assert_eq!(req.items[0].url, "https://youtu.be/abc");
    }
}
