//! yt-dlp 标准输出行解析。
//!
//! 下载时通过 `--progress-template` 让 yt-dlp 输出固定格式的进度行，
//! 通过 `--print after_move:` 输出最终文件路径：
//!
//! ```text
//! MG|downloading|1024|4096|NA|downloads/clip.f137.mp4
//! MGFILE|downloads/clip.mp4
//! ```

use super::models::{HookStatus, ProgressEvent};

pub const PROGRESS_PREFIX: &str = "MG|";
pub const FILE_PREFIX: &str = "MGFILE|";

/// `--progress-template` 参数值（`download:` 表示只在下载阶段输出）。
pub const PROGRESS_TEMPLATE: &str = "download:MG|%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.filename)s";

/// `--print` 参数值：文件移动到最终位置后输出其路径。
pub const AFTER_MOVE_PRINT: &str = "after_move:MGFILE|%(filepath)s";

#[derive(Debug, Clone, PartialEq)]
pub enum HookLine {
    Progress(ProgressEvent),
    FinalFile(String),
}

pub fn parse_line(line: &str) -> Option<HookLine> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(rest) = line.strip_prefix(FILE_PREFIX) {
        let path = rest.trim();
        if path.is_empty() || path == "NA" {
            return None;
        }
        return Some(HookLine::FinalFile(path.to_string()));
    }

    let rest = line.strip_prefix(PROGRESS_PREFIX)?;
    // 文件名本身可能含有 '|'，所以最多切 5 段。
    let mut parts = rest.splitn(5, '|');
    let status = match parts.next()? {
        "downloading" => HookStatus::Downloading,
        "finished" => HookStatus::Finished,
        "error" => HookStatus::Error,
        _ => return None,
    };
    let downloaded_bytes = parse_number(parts.next());
    let total_bytes = parse_number(parts.next());
    let total_bytes_estimate = parse_number(parts.next());
    let filename = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "NA")
        .map(str::to_string);

    Some(HookLine::Progress(ProgressEvent {
        status,
        downloaded_bytes,
        total_bytes,
        total_bytes_estimate,
        filename,
    }))
}

// yt-dlp 对缺失值输出 "NA"，估算值可能是浮点数。
fn parse_number(raw: Option<&str>) -> Option<u64> {
    let raw = raw?.trim();
    if raw.is_empty() || raw == "NA" || raw == "None" {
        return None;
    }
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_downloading_line() {
        let got = parse_line("MG|downloading|1024|4096|NA|downloads/clip.f137.mp4\n").unwrap();
        let HookLine::Progress(ev) = got else {
            panic!("expected progress line");
        };
        assert_eq!(ev.status, HookStatus::Downloading);
        assert_eq!(ev.downloaded_bytes, Some(1024));
        assert_eq!(ev.total_bytes, Some(4096));
        assert_eq!(ev.total_bytes_estimate, None);
        assert_eq!(ev.filename.as_deref(), Some("downloads/clip.f137.mp4"));
        assert_eq!(ev.percent(), Some(25.0));
    }

    #[test]
    fn float_estimate_is_accepted() {
        let got = parse_line("MG|downloading|10|NA|200.7|x.webm").unwrap();
        let HookLine::Progress(ev) = got else {
            panic!("expected progress line");
        };
        assert_eq!(ev.total_bytes_estimate, Some(200));
        assert!(ev.percent().is_some());
    }

    #[test]
    fn filename_with_pipe_is_kept_whole() {
        let got = parse_line("MG|finished|5|5|NA|a|b.mp4").unwrap();
        let HookLine::Progress(ev) = got else {
            panic!("expected progress line");
        };
        assert_eq!(ev.status, HookStatus::Finished);
        assert_eq!(ev.filename.as_deref(), Some("a|b.mp4"));
    }

    #[test]
    fn final_file_line() {
        assert_eq!(
            parse_line("MGFILE|downloads/Clip.mp3"),
            Some(HookLine::FinalFile("downloads/Clip.mp3".to_string()))
        );
        assert_eq!(parse_line("MGFILE|NA"), None);
    }

    #[test]
    fn unrelated_output_is_ignored() {
        assert_eq!(parse_line("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_line("MG|weird|1|2|3|x"), None);
        assert_eq!(parse_line(""), None);
    }
}
