use std::collections::HashMap;
use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::capture::encoder::MULTIPART_CONTENT_TYPE;
use crate::temperature::RoiStats;
use crate::web::AppState;

const INDEX_HTML: &str = include_str!("index.html");

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn video(State(state): State<AppState>, Path(name): Path<String>) -> Result<Response, ApiError> {
    let stream = state
        .stream(&name)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("unknown stream '{name}'")))?;

    debug!(stream = %name, "Video client attached");
    let parts = stream
        .encoded_sequence(stream.profile().expected_fps)
        .map(Ok::<_, Infallible>);

    Ok((
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        Body::from_stream(parts),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct DotResponse {
    pub temperature: f64,
    pub x: u32,
    pub y: u32,
    pub requested_x: u32,
    pub requested_y: u32,
    pub coordinates_match: bool,
}

/// Non-negative integer query parameter.
fn pixel_param(params: &HashMap<String, String>, key: &str) -> Result<u32, ApiError> {
    let raw = params
        .get(key)
        .ok_or_else(|| ApiError::bad_request(format!("query parameter '{key}' is required")))?;
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("'{key}' must be an integer")))?;
    if value < 0 {
        return Err(ApiError::bad_request(format!("'{key}' must be non-negative")));
    }
    u32::try_from(value).map_err(|_| ApiError::bad_request(format!("'{key}' is out of range")))
}

pub async fn temperature(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DotResponse>, ApiError> {
    let x = pixel_param(&params, "x")?;
    let y = pixel_param(&params, "y")?;

    let sensor = state.temperature.clone();
    let reading = tokio::task::spawn_blocking(move || sensor.dot_temperature(x, y))
        .await
        .map_err(|e| ApiError::internal(format!("temperature lookup aborted: {e}")))?
        .map_err(|e| {
            warn!(x, y, error = %e, "Temperature lookup failed");
            ApiError::internal("failed to get temperature")
        })?;

    Ok(Json(DotResponse {
        temperature: (reading.temperature_c * 100.0).round() / 100.0,
        x: reading.x,
        y: reading.y,
        requested_x: x,
        requested_y: y,
        coordinates_match: reading.x == x && reading.y == y,
    }))
}

pub async fn temperature_roi(State(state): State<AppState>) -> Result<Json<RoiStats>, ApiError> {
    let sensor = state.temperature.clone();
    let stats = tokio::task::spawn_blocking(move || sensor.roi_stats())
        .await
        .map_err(|e| ApiError::internal(format!("ROI lookup aborted: {e}")))?
        .map_err(|e| {
            warn!(error = %e, "ROI lookup failed");
            ApiError::internal("failed to get ROI statistics")
        })?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn pixel_params_must_be_non_negative_integers() {
        assert_eq!(pixel_param(&params(&[("x", "192")]), "x").unwrap(), 192);
        assert_eq!(pixel_param(&params(&[("x", "0")]), "x").unwrap(), 0);

        for bad in ["-1", "1.5", "abc", "", "99999999999"] {
            let err = pixel_param(&params(&[("x", bad)]), "x").unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{bad:?}");
        }
        let missing = pixel_param(&params(&[]), "y").unwrap_err();
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    }
}
