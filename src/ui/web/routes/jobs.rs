use std::thread;

use anyhow::Result;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::base_system::media_url::normalize_url;
use crate::download::downloader::{BatchOptions, ItemNotice, download_batch};
use crate::download::formats::BEST_MP4_SELECTOR;
use crate::download::models::{BatchReport, DownloadRequest, ProgressSnapshot};
use crate::ui::web::state::{AppState, JobHandle, JobState};

#[derive(Debug, Deserialize)]
pub(crate) struct CreateJobReq {
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) format_id: Option<String>,
}

/// 空的格式标识回落到最佳 MP4。
pub(crate) fn format_or_default(format_id: Option<&str>) -> String {
    format_id
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(BEST_MP4_SELECTOR)
        .to_string()
}

/// 在当前线程执行一个任务，并把进度、结果写回任务表。
pub(crate) fn run_job(
    state: &AppState,
    handle: &JobHandle,
    request: &DownloadRequest,
) -> Result<BatchReport> {
    let id = handle.id;
    let jobs = state.jobs.clone();
    jobs.set_running(id);

    let progress_jobs = jobs.clone();
    let item_jobs = jobs.clone();
    let options = BatchOptions {
        progress: Some(Box::new(move |snap: ProgressSnapshot| progress_jobs.set_progress(id, snap))),
        on_item: Some(Box::new(move |notice: ItemNotice| {
            if let ItemNotice::Started {
                title: Some(title), ..
            } = notice
            {
                item_jobs.set_title(id, title);
            }
        })),
    };

    let result = download_batch(
        state.extractor.as_ref(),
        &state.config,
        request,
        options,
        Some(handle.cancel.as_ref()),
    );

    match &result {
        Ok(report) if report.canceled => jobs.set_canceled(id),
        Ok(report) if !report.failed.is_empty() => {
            let msg = report
                .failed
                .iter()
                .map(|(_, e)| e.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            jobs.set_failed(id, msg);
        }
        Ok(report) => jobs.set_done(id, report, &state.library_root),
        Err(e) => jobs.set_failed(id, format!("{e:#}")),
    }
    result
}

pub(crate) async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    let items = state.jobs.list();
    Json(json!({ "items": items }))
}

pub(crate) async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobReq>,
) -> Result<Json<Value>, StatusCode> {
    let url = normalize_url(&req.url).ok_or(StatusCode::BAD_REQUEST)?;
    let format_id = format_or_default(req.format_id.as_deref());

    let handle = state.jobs.create(url.clone(), format_id.clone());
    info!(target: "web", id = handle.id, url = %url, format = %format_id, "创建下载任务");

    let request = DownloadRequest::for_url(url.clone(), format_id);
    let state_for_task = state.clone();
    let handle_for_task = handle.clone();
    thread::spawn(move || {
        if let Err(e) = run_job(&state_for_task, &handle_for_task, &request) {
            warn!(target: "web", id = handle_for_task.id, "任务失败: {e:#}");
        }
    });

    Ok(Json(
        json!({ "id": handle.id, "url": url, "state": JobState::Queued }),
    ))
}

pub(crate) async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, StatusCode> {
    if state.jobs.request_cancel(id) {
        Ok(Json(json!({"ok": true})))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub(crate) async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, StatusCode> {
    if state.jobs.remove(id) {
        Ok(Json(json!({"ok": true})))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
