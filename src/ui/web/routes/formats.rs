use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::base_system::media_url::normalize_url;
use crate::download::plan::probe_media;
use crate::ui::web::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct FormatsReq {
    #[serde(default)]
    pub(crate) url: Option<String>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// `POST /get-formats`：返回 `[{id, text}]` 格式菜单。
pub(crate) async fn get_formats(
    State(state): State<AppState>,
    Json(req): Json<FormatsReq>,
) -> Response {
    let raw = req.url.unwrap_or_default();
    if raw.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "URL is required.");
    }
    let Some(url) = normalize_url(&raw) else {
        return error(StatusCode::BAD_REQUEST, "That does not look like a URL.");
    };

    let extractor = state.extractor.clone();
    let cfg = state.config.clone();
    let result =
        tokio::task::spawn_blocking(move || probe_media(extractor.as_ref(), &cfg, &url)).await;

    match result {
        Ok(Ok(probe)) => Json(probe.choices).into_response(),
        Ok(Err(err)) => {
            warn!(target: "web", "获取格式失败: {err:#}");
            error(StatusCode::INTERNAL_SERVER_ERROR, err.root_cause().to_string())
        }
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
