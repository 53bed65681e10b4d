use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::SET_COOKIE;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::ui::web::state::AppState;

pub(crate) const SESSION_COOKIE: &str = "media_grab_session";

#[derive(Debug, Deserialize)]
pub(crate) struct LoginReq {
    pub(crate) password: String,
}

pub(crate) async fn api_login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> Result<Response, StatusCode> {
    let Some(auth) = &state.auth else {
        return Ok(Json(json!({"ok": true, "locked": false})).into_response());
    };

    let provided = req.password.trim();
    if provided.is_empty() || !auth.verify_password(provided) {
        info!(target: "web", ok = false, "登录失败");
        return Err(StatusCode::UNAUTHORIZED);
    }
    info!(target: "web", ok = true, "登录成功");

    let cookie = format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800",
        auth.session_token()
    );
    Ok((
        [(SET_COOKIE, cookie)],
        Json(json!({"ok": true, "locked": true})),
    )
        .into_response())
}
