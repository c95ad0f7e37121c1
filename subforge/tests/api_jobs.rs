mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{Behavior, Harness, RENDERS, ScriptedProcessor, TRANSCRIBE};
use subforge::api::{ApiServer, ApiServerConfig, AppState};
use subforge::pipeline::Processor;

const BOUNDARY: &str = "subforge-test-boundary";

async fn harness() -> Harness {
    let processors: Vec<Arc<dyn Processor>> = vec![
        ScriptedProcessor::new(TRANSCRIBE, Behavior::Succeed),
        ScriptedProcessor::new(RENDERS, Behavior::Succeed),
    ];
    Harness::new(processors).await
}

fn app(harness: &Harness) -> Router {
    let state = AppState::new(harness.manager.clone());
    ApiServer::new(ApiServerConfig::default(), state, CancellationToken::new()).build_router()
}

fn get(uri: &str, owner: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, owner: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-owner-id", owner)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap()
}

fn upload_body(title: &str, filename: &str, contents: &str) -> String {
    format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"title\"\r\n\r\n\
         {title}\r\n\
         --{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"video\"; filename=\"{filename}\"\r\n\
         Content-Type: video/mp4\r\n\r\n\
         {contents}\r\n\
         --{BOUNDARY}--\r\n"
    )
}

async fn json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let harness = harness().await;
    let response = app(&harness).oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["jobs"], 0);
}

#[tokio::test]
async fn test_style_presets_are_listed() {
    let harness = harness().await;
    let response = app(&harness).oneshot(get("/styles/presets", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    let presets = body.as_array().unwrap();
    assert_eq!(presets.len(), 5);
    assert_eq!(presets[0]["id"], "builtin:social-classic");
    assert_eq!(presets[0]["style"]["font_family"], "Montserrat");
    assert_eq!(presets[0]["style"]["position"], "bottom");
}

#[tokio::test]
async fn test_upload_sets_session_and_returns_ticket() {
    let harness = harness().await;
    let request = Request::builder()
        .method("POST")
        .uri("/projects")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(upload_body("Trip", "trip.mp4", "fake video bytes")))
        .unwrap();

    let response = app(&harness).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("subforge_session="));

    let body = json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(body["ticket"].as_u64().unwrap() > 0);

    let session = cookie.split(';').next().unwrap().to_string();
    let request = Request::builder()
        .uri(format!("/jobs/{job_id}"))
        .header(header::COOKIE, session)
        .body(Body::empty())
        .unwrap();
    let response = app(&harness).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json(response).await;
    assert_eq!(status["title"], "Trip");
    assert_eq!(status["status"], "queued");
}

#[tokio::test]
async fn test_upload_with_wrong_extension_is_rejected() {
    let harness = harness().await;
    let request = post(
        "/projects",
        "alice",
        &format!("multipart/form-data; boundary={BOUNDARY}"),
        upload_body("Notes", "notes.txt", "plain text"),
    );

    let response = app(&harness).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert!(harness.manager.store().is_empty());
}

#[tokio::test]
async fn test_status_is_private_to_owner() {
    let harness = harness().await;
    let (job_id, _) = harness.upload("alice").await;

    let response = app(&harness)
        .oneshot(get(&format!("/jobs/{job_id}"), Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(&harness)
        .oneshot(get(&format!("/jobs/{job_id}"), Some("mallory")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(response).await["code"], "FORBIDDEN");

    let response = app(&harness)
        .oneshot(get("/jobs/not-a-job", Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retry_of_completed_job_conflicts() {
    let harness = harness().await;
    let (job_id, _) = harness.upload("alice").await;
    harness.drain().await;

    let response = app(&harness)
        .oneshot(post(&format!("/jobs/{job_id}/retry"), "alice", "text/plain", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn test_touch_and_pin_accept_forms() {
    let harness = harness().await;
    let (job_id, _) = harness.upload("alice").await;
    harness.drain().await;
    let form = "application/x-www-form-urlencoded";

    let response = app(&harness)
        .oneshot(post(&format!("/jobs/{job_id}/touch"), "alice", form, "locked=on"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["locked"], true);

    let response = app(&harness)
        .oneshot(post(&format!("/jobs/{job_id}/pin?pinned=true"), "alice", form, ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["pinned"], true);

    let response = app(&harness)
        .oneshot(post(&format!("/jobs/{job_id}/pin"), "alice", form, "pinned=maybe"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Locked jobs cannot be deleted.
    let response = app(&harness)
        .oneshot(post(&format!("/jobs/{job_id}/delete"), "alice", form, ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_recent_lists_only_own_jobs() {
    let harness = harness().await;
    harness.upload("alice").await;
    harness.upload("alice").await;
    harness.upload("bob").await;

    let response = app(&harness).oneshot(get("/jobs/recent", Some("alice"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await.as_array().unwrap().len(), 2);

    let response = app(&harness).oneshot(get("/jobs/recent", None)).await.unwrap();
    assert_eq!(json(response).await.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_subtitle_round_trip_through_api() {
    let harness = harness().await;
    let (job_id, _) = harness.upload("alice").await;
    harness.drain().await;

    let response = app(&harness)
        .oneshot(get(&format!("/projects/{job_id}/subtitles.srt"), Some("alice")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.ends_with(".srt\""));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let srt = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,000\nhello world"));

    let edited = srt.replace("hello world", "hello there");
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/projects/{job_id}/subtitles/import"))
        .header("x-owner-id", "alice")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(edited))
        .unwrap();
    let response = app(&harness).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let saved = json(response).await;
    assert_eq!(saved["revision"], 2);
    assert_eq!(saved["blocks"], 2);

    let document = harness.manager.load_subtitles(&job_id, Some("alice")).await.unwrap();
    assert_eq!(document.subtitles[0].text, "hello there");
    assert_eq!(harness.record(&job_id).pending_steps.len(), 1);
}

#[tokio::test]
async fn test_export_is_accepted() {
    let harness = harness().await;
    let (job_id, _) = harness.upload("alice").await;
    harness.drain().await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/projects/{job_id}/export"))
        .header("x-owner-id", "alice")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"karaoke":true}"#))
        .unwrap();
    let response = app(&harness).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    harness.drain().await;
    let response = app(&harness)
        .oneshot(get(&format!("/jobs/{job_id}"), Some("alice")))
        .await
        .unwrap();
    let status = json(response).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["output"]["step"], "export_karaoke");
}
