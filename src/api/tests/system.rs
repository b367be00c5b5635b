use super::*;
use crate::events::{Event, EventKind, SubjectType};

#[tokio::test]
async fn health_reports_ok_and_version() {
    let f = fixture().await;
    let (status, body) = get_json(&f.router, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn stats_counts_downloads_and_speed() {
    let f = fixture().await;
    seed_download(&f.db).await;
    f.sampler.record(12_345);

    let (status, body) = get_json(&f.router, "/api/v1/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["downloads"], 1);
    assert!(body["current_speed_bps"].as_u64().unwrap() > 0);
    assert_eq!(body["events_dropped"], 0);
}

#[tokio::test]
async fn event_history_is_served_newest_first() {
    let f = fixture().await;
    for kind in [EventKind::SystemStarted, EventKind::DownloadDiscovered] {
        f.db.insert_event(&Event::new(kind, SubjectType::System).message(kind.as_str()))
            .await
            .unwrap();
    }

    let (status, body) = get_json(&f.router, "/api/v1/events?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["kind"], "download.discovered");
}

#[tokio::test]
async fn event_stream_has_the_sse_content_type() {
    let f = fixture().await;
    let response = f
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/events/stream")
                .header("Accept", "text/event-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(content_type.contains("text/event-stream"), "{content_type}");
}

#[tokio::test]
async fn speed_history_returns_the_ring_buffer() {
    let f = fixture().await;
    f.sampler.record(500);

    let (status, body) = get_json(&f.router, "/api/v1/speed/history").await;
    assert_eq!(status, StatusCode::OK);
    let samples = body.as_array().unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0]["bytes"], 500);
}

#[tokio::test]
async fn downloaders_listing_redacts_credentials() {
    let f = fixture().await;
    let (status, body) = get_json(&f.router, "/api/v1/downloaders").await;
    assert_eq!(status, StatusCode::OK);

    let downloaders = body.as_array().unwrap();
    assert_eq!(downloaders.len(), 1);
    assert_eq!(downloaders[0]["name"], "box1");
    assert!(
        !body.to_string().contains("hunter2"),
        "passwords must never leave the process"
    );
}

#[tokio::test]
async fn apps_listing_redacts_the_api_key() {
    let f = fixture().await;
    let (status, body) = get_json(&f.router, "/api/v1/apps").await;
    assert_eq!(status, StatusCode::OK);

    let apps = body.as_array().unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0]["category"], "tv-sonarr");
    assert!(
        !body.to_string().contains("super-secret"),
        "API keys must never leave the process"
    );
}

#[tokio::test]
async fn openapi_document_is_served() {
    let f = fixture().await;
    let (status, body) = get_json(&f.router, "/api/v1/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/downloads"].is_object());
}
