use axum::Router;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tracing::info;

use super::routes;
use super::routes::auth::SESSION_COOKIE;
use super::state::AppState;

pub(crate) const PASSWORD_HEADER: &str = "x-media-grab-password";

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index::index))
        .route("/assets/app.css", get(routes::index::asset_css))
        .route("/assets/app.js", get(routes::index::asset_js))
        .route("/get-formats", post(routes::formats::get_formats))
        .route("/download", post(routes::download::download_form))
        .route("/files/*path", get(routes::download::download_file))
        .route("/api/login", post(routes::auth::api_login))
        .route("/api/status", get(routes::status::api_status))
        .route("/api/library", get(routes::library::api_library))
        .route("/api/events", get(routes::events::event_stream))
        .route(
            "/api/jobs",
            get(routes::jobs::list_jobs).post(routes::jobs::create_job),
        )
        .route("/api/jobs/:id", delete(routes::jobs::delete_job))
        .route("/api/jobs/:id/cancel", post(routes::jobs::cancel_job))
        .layer(from_fn_with_state(state.clone(), auth_and_log_mw))
        .with_state(state)
}

/// 锁定模式下，除首页、静态资源与登录接口外都需要会话 cookie 或密码请求头。
fn is_public(path: &str) -> bool {
    path == "/" || path.starts_with("/assets/") || path == "/api/login"
}

async fn auth_and_log_mw(
    axum::extract::State(state): axum::extract::State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().to_string();
    let ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|c| c.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let Some(auth) = &state.auth
        && !is_public(&path)
    {
        let by_cookie = req
            .headers()
            .get(axum::http::header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| cookie_value(raw, SESSION_COOKIE))
            .is_some_and(|token| auth.verify_session_token(token));

        // 脚本调用可以直接带密码请求头。
        let by_header = || {
            req.headers()
                .get(PASSWORD_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|p| !p.is_empty())
                .is_some_and(|p| auth.verify_password(p))
        };

        if !by_cookie && !by_header() {
            info!(target: "web_access", ip = %ip, method = %method, path = %path, status = 401, "unauthorized");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }

    let resp = next.run(req).await;
    info!(target: "web_access", ip = %ip, method = %method, path = %path, status = %resp.status().as_u16(), "ok");
    resp
}

fn cookie_value<'a>(raw_cookie: &'a str, key: &str) -> Option<&'a str> {
    let prefix = format!("{key}=");
    raw_cookie
        .split(';')
        .map(|p| p.trim())
        .find_map(|p| p.strip_prefix(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use axum::body::{Body, to_bytes};
    use axum::http::header;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::base_system::context::Config;
    use crate::download::test_support::FakeExtractor;
    use crate::extractor::models::{FormatInfo, MediaInfo};
    use crate::ui::web::state::{AuthState, JobState};

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
                filesize: Some(2 * 1024 * 1024),
                ..FormatInfo::default()
            }],
            ..MediaInfo::default()
        }
    }

    fn state_with(
        dir: &tempfile::TempDir,
        fake: FakeExtractor,
        auth: Option<AuthState>,
    ) -> AppState {
        let cfg = Config {
            save_path: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        AppState::new(cfg, Arc::new(fake), "yt-dlp".to_string(), auth, Vec::new())
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn get_formats_requires_url() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state_with(&dir, FakeExtractor::default(), None));
        let resp = app.oneshot(json_post("/get-formats", "{}")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v["error"], "URL is required.");
    }

    #[tokio::test]
    async fn option_like_urls_never_reach_the_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExtractor::with_info(video_info()));
        let cfg = Config {
            save_path: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        let state = AppState::new(cfg, fake.clone(), "yt-dlp".to_string(), None, Vec::new());
        let app = build_router(state.clone());

        let resp = app
            .clone()
            .oneshot(json_post("/get-formats", r#"{"url":"--batch-file=/etc/passwd"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v["error"], "That does not look like a URL.");

        let resp = app
            .clone()
            .oneshot(json_post("/api/jobs", r#"{"url":"--exec=id","format_id":"22"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .method("POST")
            .uri("/download")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("url=--batch-file%3D%2Fetc%2Fpasswd&format_id=22"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_string(resp).await;
        assert!(page.contains("That does not look like a URL."), "{page}");
        assert!(!page.contains("root:"));

        assert!(fake.probe_calls().is_empty());
        assert!(fake.download_calls().is_empty());
        assert!(state.jobs.list().is_empty());
    }

    #[tokio::test]
    async fn get_formats_returns_curated_menu() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(state_with(&dir, FakeExtractor::with_info(video_info()), None));
        let resp = app
            .oneshot(json_post("/get-formats", r#"{"url":"https://youtu.be/abc"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v[0]["id"], "bestaudio/best");
        assert_eq!(v[0]["text"], "Audio Only (Best Quality MP3)");
        assert_eq!(v[1]["id"], "22");
        assert_eq!(v[1]["text"], "720p - MP4 (2.00 MB)");
    }

    #[tokio::test]
    async fn get_formats_reports_extractor_error() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeExtractor::failing_probe("ERROR: Unsupported URL: https://example.com");
        let app = build_router(state_with(&dir, fake, None));
        let resp = app
            .oneshot(json_post("/get-formats", r#"{"url":"https://example.com"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v["error"], "ERROR: Unsupported URL: https://example.com");
    }

    #[tokio::test]
    async fn form_download_renders_result_page() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(&dir, FakeExtractor::with_info(video_info()), None);
        let app = build_router(state.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/download")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("url=https%3A%2F%2Fyoutu.be%2Fabc&format_id=bestaudio%2Fbest"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_string(resp).await;
        assert!(page.contains("Successfully downloaded: abc"), "{page}");
        assert!(dir.path().join("abc.mp3").is_file());
        assert_eq!(state.jobs.list()[0].state, JobState::Done);
    }

    #[tokio::test]
    async fn form_download_failure_is_still_200() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeExtractor::with_info(video_info()).failing_on("abc");
        let app = build_router(state_with(&dir, fake, None));
        let req = Request::builder()
            .method("POST")
            .uri("/download")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("url=https%3A%2F%2Fyoutu.be%2Fabc&format_id=22"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_string(resp).await;
        assert!(page.contains("An error occurred: ERROR: Video unavailable"), "{page}");
    }

    #[tokio::test]
    async fn background_job_finishes_and_shows_in_library() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(&dir, FakeExtractor::with_info(video_info()), None);
        let app = build_router(state.clone());

        let resp = app
            .clone()
            .oneshot(json_post(
                "/api/jobs",
                r#"{"url":"https://youtu.be/xyz","format_id":"22"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        let id = v["id"].as_u64().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while state.jobs.get(id).map(|j| j.state) != Some(JobState::Done) {
            assert!(Instant::now() < deadline, "job did not finish");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state.jobs.get(id).unwrap().files, vec!["xyz.mp4"]);

        let resp = app.clone().oneshot(get("/api/library")).await.unwrap();
        let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v["items"][0]["rel_path"], "xyz.mp4");

        let resp = app.clone().oneshot(get("/files/xyz.mp4")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(body_string(resp).await, "fake media");

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/jobs/{id}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app
            .oneshot(json_post(&format!("/api/jobs/{id}/cancel"), ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn locked_server_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let auth = AuthState::from_password("secret");
        let app = build_router(state_with(&dir, FakeExtractor::default(), Some(auth.clone())));

        let resp = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.clone().oneshot(get("/api/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(json_post("/api/login", r#"{"password":"wrong"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(json_post("/api/login", r#"{"password":"secret"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE}={}", auth.session_token())));
        assert!(!cookie.contains("secret"));

        let token_cookie = cookie.split(';').next().unwrap().to_string();
        let req = Request::builder()
            .uri("/api/status")
            .header(header::COOKIE, token_cookie)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v["locked"], true);

        let req = Request::builder()
            .uri("/api/jobs")
            .header(PASSWORD_HEADER, "secret")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn cookie_lookup_handles_multiple_pairs() {
        assert_eq!(cookie_value("a=1; b=2", "b"), Some("2"));
        assert_eq!(cookie_value("a=1", "b"), None);
    }
}
