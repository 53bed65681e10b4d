use std::path::{Path, PathBuf};

use axum::Form;
use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, Response};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::base_system::media_url::normalize_url;
use crate::download::models::DownloadRequest;
use crate::ui::web::routes::jobs::{format_or_default, run_job};
use crate::ui::web::state::AppState;
use crate::ui::web::templates;

#[derive(Debug, Deserialize)]
pub(crate) struct DownloadForm {
    #[serde(default)]
    pub(crate) url: Option<String>,
    #[serde(default)]
    pub(crate) format_id: Option<String>,
}

/// `POST /download`：同步下载，完成后渲染结果页（成功或失败都返回 200）。
pub(crate) async fn download_form(
    State(state): State<AppState>,
    Form(form): Form<DownloadForm>,
) -> Html<String> {
    let raw = form.url.unwrap_or_default();
    if raw.trim().is_empty() {
        return Html(templates::render_result("An error occurred: URL is required."));
    }
    let Some(url) = normalize_url(&raw) else {
        warn!(target: "web", input = %raw.trim(), "拒绝无效的下载地址");
        return Html(templates::render_result(
            "An error occurred: That does not look like a URL.",
        ));
    };
    let format_id = format_or_default(form.format_id.as_deref());
    info!(target: "web", url = %url, format = %format_id, "表单下载");

    let handle = state.jobs.create(url.clone(), format_id.clone());
    let request = DownloadRequest::for_url(url, format_id);
    let task_state = state.clone();
    let result =
        tokio::task::spawn_blocking(move || run_job(&task_state, &handle, &request)).await;

    let message = match result {
        Ok(Ok(report)) if report.canceled => "An error occurred: download canceled".to_string(),
        Ok(Ok(report)) => match report.failed.first() {
            Some((_, err)) => format!("An error occurred: {err}"),
            None => format!(
                "Successfully downloaded: {}",
                report.title.as_deref().unwrap_or("Unknown Title")
            ),
        },
        Ok(Err(err)) => format!("An error occurred: {err:#}"),
        Err(err) => {
            warn!(target: "web", "下载任务异常退出: {err}");
            format!("An error occurred: {err}")
        }
    };
    Html(templates::render_result(&message))
}

fn make_content_disposition(filename: &str) -> Option<header::HeaderValue> {
    // RFC 5987 filename*，另附 ASCII 回退名。
    fn is_unreserved(b: u8) -> bool {
        b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_')
    }

    let mut encoded = String::with_capacity(filename.len() * 3);
    for &b in filename.as_bytes() {
        if is_unreserved(b) {
            encoded.push(char::from(b));
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }

    let ascii_fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii() && is_unreserved(c as u8) { c } else { '_' })
        .collect();

    let value = format!("attachment; filename=\"{ascii_fallback}\"; filename*=UTF-8''{encoded}");
    header::HeaderValue::from_str(&value).ok()
}

pub(crate) fn mime_for(ext: &str) -> &'static str {
    match ext {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "opus" | "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// 解析请求路径并确认它仍在媒体库根目录内。
fn resolve_target(base: &Path, path: &str) -> Result<PathBuf, StatusCode> {
    if path.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    let base_canon = std::fs::canonicalize(base).map_err(|_| StatusCode::NOT_FOUND)?;
    let target_canon =
        std::fs::canonicalize(base.join(path)).map_err(|_| StatusCode::NOT_FOUND)?;
    if !target_canon.starts_with(&base_canon) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(target_canon)
}

/// `GET /files/*path`：流式返回媒体库中的文件。
pub(crate) async fn download_file(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> Result<Response, StatusCode> {
    let target = resolve_target(state.library_root.as_ref(), &path)?;
    let meta = tokio::fs::metadata(&target)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    if !meta.is_file() {
        return Err(StatusCode::NOT_FOUND);
    }

    let ext = target
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let file = tokio::fs::File::open(&target)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut resp = Response::new(body);
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(mime_for(&ext)),
    );
    headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(meta.len()));
    if let Some(name) = target.file_name().and_then(|s| s.to_str())
        && let Some(hv) = make_content_disposition(name)
    {
        headers.insert(header::CONTENT_DISPOSITION, hv);
    }
    Ok(resp)
}
