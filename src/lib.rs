pub mod camera;
pub mod capture;
pub mod config;
pub mod error;
pub mod temperature;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod web;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use camera::{Credentials, StreamProfile, Transport};
pub use capture::{Frame, FrameBuffer, PixelFormat, SnapshotMode, StreamHandle};
pub use error::StreamError;

/// Channel of the visible-light sensor on the camera.
pub const RGB_CHANNEL: u32 = 1;
/// Channel of the thermal sensor on the camera.
pub const THERMAL_CHANNEL: u32 = 2;
pub const RGB_EXPECTED_FPS: f64 = 30.0;
pub const THERMAL_EXPECTED_FPS: f64 = 15.0;

/// Fully resolved process configuration.
///
/// Built once by the entry point (see [`config::load`]) and handed down
/// explicitly; nothing in the crate reads it from a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub camera: Credentials,
    pub rgb: StreamProfile,
    pub thermal: StreamProfile,
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub temperature: TemperatureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub reconnect_delay: Duration,
    pub shutdown_timeout: Duration,
    pub transport: Transport,
    pub jpeg_quality: u8,
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The camera's RTSP profiles.
    #[default]
    Rtsp,
    /// Generated test pattern; no camera needed.
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: Credentials::new("192.168.0.10", "admin", "admin123"),
            rgb: StreamProfile::new("profile1", RGB_CHANNEL, Some(RGB_EXPECTED_FPS)),
            thermal: StreamProfile::new("profile4", THERMAL_CHANNEL, Some(THERMAL_EXPECTED_FPS)),
            server: ServerConfig {
                bind: "0.0.0.0:8000".into(),
            },
            capture: CaptureConfig::default(),
            temperature: TemperatureConfig {
                timeout: Duration::from_secs(3),
            },
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Rtsp,
            reconnect_delay: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(2),
            transport: Transport::Tcp,
            jpeg_quality: 80,
        }
    }
}
