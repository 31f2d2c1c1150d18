//! Thermal sensor temperature readings over the camera's HTTP API

mod client;
mod xml;

use serde::Serialize;
use thiserror::Error;

pub use client::TemperatureClient;
pub use xml::{parse_dot_response, parse_roi_response};

/// One pixel reading as reported by the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DotReading {
    /// Degrees Celsius.
    pub temperature_c: f64,
    /// Pixel the camera says it measured; may differ from the requested one.
    pub x: u32,
    pub y: u32,
}

/// Region-of-interest aggregate in degrees Celsius.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RoiStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
}

#[derive(Error, Debug)]
pub enum TemperatureError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("camera answered HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("malformed XML: {0}")]
    Malformed(String),
    #[error("response is missing <{0}>")]
    Missing(&'static str),
    #[error("<{0}> appears more than once")]
    Duplicate(&'static str),
    #[error("invalid <{field}> value {value:?}")]
    InvalidValue { field: &'static str, value: String },
    #[error("response carries no temperature readings")]
    NoReadings,
}

pub type Result<T> = std::result::Result<T, TemperatureError>;

/// Source of temperature readings. Calls block; async callers should run
/// them on the blocking pool.
pub trait TemperatureSource: Send + Sync {
    fn dot_temperature(&self, x: u32, y: u32) -> Result<DotReading>;

    fn roi_stats(&self) -> Result<RoiStats>;
}
