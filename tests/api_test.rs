use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use mediahound::api::{build_state, router};
use mediahound::api::models::ExtractResponse;
use mediahound::config::Config;
use mediahound::discovery::replay::{PageScript, ReplayDriver};
use mediahound::discovery::{BrowserCookie, BrowserDriver, ObservedResponse};
use mediahound::tasks::{TaskKind, TaskSnapshot, TaskStatus};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const PAGE: &str = "https://videos.example.com/watch/42";

/// Test config: no stimulation pauses, downloads land in a temp dir
fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.stimulation.settle_ms = 0;
    config.stimulation.step_pause_ms = 0;
    config.server.download_dir = dir.path().join("downloads");
    config.transcode.output_dir = dir.path().join("converted");
    config.transcode.enabled = false;
    config
}

fn recorded_page() -> ReplayDriver {
    ReplayDriver::new().with_page(
        PAGE,
        PageScript::new()
            .respond(
                ObservedResponse::new("https://cdn.example.com/thumb.jpg")
                    .content_type("image/jpeg")
                    .content_length(9_000),
            )
            .respond(
                ObservedResponse::new("https://cdn.example.com/preview.mp4")
                    .content_type("video/mp4")
                    .content_length(1_024),
            )
            .respond(
                ObservedResponse::new("https://cdn.example.com/full.mp4")
                    .content_type("video/mp4")
                    .content_length(8_388_608),
            )
            .cookie(BrowserCookie::new("session", "abc123")),
    )
}

/// Build the app over a replayed browser
async fn build_test_app() -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let driver: Arc<dyn BrowserDriver> = Arc::new(recorded_page());
    let state = build_state(test_config(&temp_dir), Some(driver)).await.unwrap();
    (router(state), temp_dir)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Polls the progress endpoint until the task reaches a terminal status
async fn wait_for_task(app: &Router, task_id: &str) -> TaskSnapshot {
    for _ in 0..500 {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/progress/{task_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot: TaskSnapshot = serde_json::from_value(body_json(response).await).unwrap();
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never finished");
}

#[tokio::test]
async fn test_extract_discovers_ranked_candidates() {
    let (app, _temp_dir) = build_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/api/extract", json!({ "url": PAGE })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let accepted: ExtractResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert!(!accepted.task_id.is_empty());
    assert!(accepted.media_url.is_none());

    let snapshot = wait_for_task(&app, &accepted.task_id).await;
    assert_eq!(snapshot.kind, TaskKind::Discovery);
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.progress, 100);

    // Largest first, the thumbnail never makes it in
    let files = snapshot.media_files.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].url, "https://cdn.example.com/full.mp4");
    assert_eq!(files[0].size_bytes, Some(8_388_608));
    assert_eq!(files[1].url, "https://cdn.example.com/preview.mp4");
}

#[tokio::test]
async fn test_extract_direct_media_url() {
    let (app, _temp_dir) = build_test_app().await;
    let url = "https://cdn.example.com/clip.webm";

    let response = app
        .clone()
        .oneshot(post_json("/api/extract", json!({ "url": url })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let accepted: ExtractResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(accepted.status, TaskStatus::Completed);
    assert_eq!(accepted.media_url.as_deref(), Some(url));

    let snapshot = wait_for_task(&app, &accepted.task_id).await;
    let files = snapshot.media_files.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].extension, ".webm");
}

#[tokio::test]
async fn test_extract_direct_flag_skips_discovery() {
    let (app, _temp_dir) = build_test_app().await;
    let url = "https://cdn.example.com/stream?id=7";

    let response = app
        .oneshot(post_json("/api/extract", json!({ "url": url, "direct_url": true })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let accepted: ExtractResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(accepted.status, TaskStatus::Completed);
    assert_eq!(accepted.media_url.as_deref(), Some(url));
}

#[tokio::test]
async fn test_extract_refuses_drm_sites() {
    let (app, _temp_dir) = build_test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/extract",
            json!({ "url": "https://www.netflix.com/watch/80100172" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error = body_json(response).await;
    assert_eq!(error["code"], "DRM_PROTECTED");
    assert!(error["message"].as_str().unwrap().contains("DRM"));
}

#[tokio::test]
async fn test_extract_rejects_bad_payloads() {
    let (app, _temp_dir) = build_test_app().await;

    // Wrong content type
    let request = Request::builder()
        .uri("/api/extract")
        .method("POST")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(PAGE))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Not JSON
    let request = Request::builder()
        .uri("/api/extract")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unsupported scheme
    let response = app
        .clone()
        .oneshot(post_json("/api/extract", json!({ "url": "ftp://files.example.com/a" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Empty url
    let response = app
        .oneshot(post_json("/api/extract", json!({ "url": "  " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let (app, _temp_dir) = build_test_app().await;

    for uri in [
        "/api/progress/nope",
        "/api/proxy-download/nope",
        "/api/proxy-download/nope/3",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_proxy_download_index_out_of_range() {
    let (app, _temp_dir) = build_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/api/extract", json!({ "url": PAGE })))
        .await
        .unwrap();
    let accepted: ExtractResponse = serde_json::from_value(body_json(response).await).unwrap();
    wait_for_task(&app, &accepted.task_id).await;

    let response = app
        .oneshot(get(&format!("/api/proxy-download/{}/7", accepted.task_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_for_unknown_task() {
    let (app, _temp_dir) = build_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/api/download", json!({ "task_id": "missing", "index": 0 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(post_json("/api/download", json!({ "task_id": "" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_finished_and_unknown_tasks() {
    let (app, _temp_dir) = build_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/extract",
            json!({ "url": "https://cdn.example.com/clip.mp4" }),
        ))
        .await
        .unwrap();
    let accepted: ExtractResponse = serde_json::from_value(body_json(response).await).unwrap();

    let cancel = |id: &str| {
        Request::builder()
            .uri(format!("/api/tasks/{id}"))
            .method("DELETE")
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(cancel(&accepted.task_id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.oneshot(cancel("missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_convert_missing_input_fails_task() {
    let (app, temp_dir) = build_test_app().await;
    let downloads = temp_dir.path().join("downloads");
    std::fs::create_dir_all(&downloads).unwrap();
    let input = downloads.join("absent.mp4");

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/convert",
            json!({ "input_path": input, "profile": "audio" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let accepted = body_json(response).await;
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    let snapshot = wait_for_task(&app, &task_id).await;
    assert_eq!(snapshot.kind, TaskKind::Convert);
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert!(snapshot.message.contains("Input file not found"));
}

#[tokio::test]
async fn test_convert_refuses_paths_outside_download_dirs() {
    let (app, temp_dir) = build_test_app().await;
    std::fs::create_dir_all(temp_dir.path().join("downloads")).unwrap();
    std::fs::write(temp_dir.path().join("notes.txt"), "private").unwrap();

    for input in [
        "/etc/hostname".to_string(),
        temp_dir.path().join("downloads/../notes.txt").display().to_string(),
    ] {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/convert",
                json!({ "input_path": input, "profile": "audio" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{input}");
        assert_eq!(body_json(response).await["code"], "INVALID_PAYLOAD");
    }

    let health = body_json(app.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["metrics"]["tasks_submitted"], 0);
}

#[tokio::test]
async fn test_health_check() {
    let (app, _temp_dir) = build_test_app().await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["discoverer"], "replay");
    assert_eq!(health["components"]["transcoder"], "disabled");
    assert_eq!(health["active_tasks"], 0);
    assert_eq!(health["metrics"]["tasks_submitted"], 0);
}
