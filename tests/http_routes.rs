use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use geovision_streamer::capture::CaptureOptions;
use geovision_streamer::temperature::{self, DotReading, RoiStats, TemperatureError, TemperatureSource};
use geovision_streamer::testing::ScriptedBackend;
use geovision_streamer::web::{router, AppState};
use geovision_streamer::{Credentials, StreamHandle, StreamProfile};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Sensor that answers every request with the same canned result.
struct CannedSensor {
    dot: Option<DotReading>,
    roi: Option<RoiStats>,
}

impl TemperatureSource for CannedSensor {
    fn dot_temperature(&self, _x: u32, _y: u32) -> temperature::Result<DotReading> {
        self.dot.ok_or(TemperatureError::Missing("temperature"))
    }

    fn roi_stats(&self) -> temperature::Result<RoiStats> {
        self.roi.ok_or(TemperatureError::NoReadings)
    }
}

fn state(sensor: CannedSensor) -> AppState {
    let stream = Arc::new(StreamHandle::new(
        "rgb",
        StreamProfile::new("profile1", 1, Some(30.0)),
        Credentials::new("127.0.0.1", "admin", "secret"),
        CaptureOptions::default(),
        Arc::new(ScriptedBackend::new()),
    ));
    AppState::new([stream], Arc::new(sensor))
}

fn working_sensor() -> CannedSensor {
    CannedSensor {
        dot: Some(DotReading {
            temperature_c: 28.35,
            x: 192,
            y: 144,
        }),
        roi: Some(RoiStats {
            min: Some(20.5),
            max: Some(35.25),
            avg: None,
        }),
    }
}

fn failing_sensor() -> CannedSensor {
    CannedSensor { dot: None, roi: None }
}

async fn get(state: AppState, uri: &str) -> Response {
    router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let response = get(state(working_sensor()), "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn unknown_stream_is_not_found() {
    let response = get(state(working_sensor()), "/video/unknown").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn known_stream_is_multipart() {
    let response = get(state(working_sensor()), "/video/rgb").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn negative_coordinate_is_bad_request() {
    let response = get(state(working_sensor()), "/temperature?x=-1&y=5").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn missing_or_garbled_coordinates_are_bad_requests() {
    for uri in ["/temperature", "/temperature?x=5", "/temperature?x=a&y=1", "/temperature?x=1&y=2.5"] {
        let response = get(state(working_sensor()), uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn dot_temperature_is_reported() {
    let response = get(state(working_sensor()), "/temperature?x=192&y=144").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({
            "temperature": 28.35,
            "x": 192,
            "y": 144,
            "requested_x": 192,
            "requested_y": 144,
            "coordinates_match": true
        })
    );
}

#[tokio::test]
async fn echoed_coordinates_may_differ() {
    let response = get(state(working_sensor()), "/temperature?x=10&y=144").await;
    let body = json_body(response).await;
    assert_eq!(body["requested_x"], 10);
    assert_eq!(body["x"], 192);
    assert_eq!(body["coordinates_match"], false);
}

#[tokio::test]
async fn sensor_failure_is_server_error() {
    let response = get(state(failing_sensor()), "/temperature?x=192&y=144").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(response).await["error"].is_string());

    let response = get(state(failing_sensor()), "/temperature/roi").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn roi_omits_absent_fields() {
    let response = get(state(working_sensor()), "/temperature/roi").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "min": 20.5, "max": 35.25 }));
}

#[tokio::test]
async fn index_page_embeds_both_streams() {
    let response = get(state(working_sensor()), "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("/video/rgb"));
    assert!(html.contains("/video/thermal"));
}
