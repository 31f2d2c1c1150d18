//! Layered configuration: defaults, optional TOML file, `GEOVISION_*` env

use std::collections::HashMap;
use std::time::Duration;

use ::config::{Config as Layers, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::camera::{Credentials, StreamProfile, Transport};
use crate::{
    CaptureConfig, Config, ServerConfig, SourceKind, TemperatureConfig, RGB_CHANNEL, RGB_EXPECTED_FPS,
    THERMAL_CHANNEL, THERMAL_EXPECTED_FPS,
};

pub const DEFAULT_FILE: &str = "geovision.toml";
pub const ENV_PREFIX: &str = "GEOVISION";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] ConfigError),
    #[error("invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Flat view of every recognised key.
#[derive(Debug, Deserialize)]
struct RawSettings {
    ip: String,
    user: String,
    pass: String,
    rgb_profile: String,
    thermal_profile: String,
    bind: String,
    source: String,
    transport: String,
    reconnect_delay_ms: u64,
    shutdown_timeout_ms: u64,
    jpeg_quality: u8,
    temperature_timeout_ms: u64,
}

/// Load from `path` (missing file is fine) and the process environment.
pub fn load(path: &str) -> Result<Config, SettingsError> {
    load_with_env(path, None)
}

/// Like [`load`], with an explicit environment map instead of the process
/// environment when `env` is given.
pub fn load_with_env(path: &str, env: Option<HashMap<String, String>>) -> Result<Config, SettingsError> {
    let defaults = Config::default();
    let layers = Layers::builder()
        .set_default("ip", defaults.camera.host.as_str())?
        .set_default("user", defaults.camera.username.as_str())?
        .set_default("pass", defaults.camera.password.as_str())?
        .set_default("rgb_profile", defaults.rgb.profile_id.as_str())?
        .set_default("thermal_profile", defaults.thermal.profile_id.as_str())?
        .set_default("bind", defaults.server.bind.as_str())?
        .set_default("source", "rtsp")?
        .set_default("transport", defaults.capture.transport.as_str())?
        .set_default("reconnect_delay_ms", defaults.capture.reconnect_delay.as_millis() as i64)?
        .set_default("shutdown_timeout_ms", defaults.capture.shutdown_timeout.as_millis() as i64)?
        .set_default("jpeg_quality", defaults.capture.jpeg_quality as i64)?
        .set_default("temperature_timeout_ms", defaults.temperature.timeout.as_millis() as i64)?
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).source(env))
        .build()?;

    let raw: RawSettings = layers.try_deserialize()?;
    debug!(ip = %raw.ip, user = %raw.user, bind = %raw.bind, "Settings loaded");
    raw.resolve()
}

impl RawSettings {
    fn resolve(self) -> Result<Config, SettingsError> {
        let transport: Transport = self.transport.parse().map_err(|reason| SettingsError::Invalid {
            key: "transport",
            reason,
        })?;
        let source = match self.source.to_ascii_lowercase().as_str() {
            "rtsp" => SourceKind::Rtsp,
            "synthetic" => SourceKind::Synthetic,
            other => {
                return Err(SettingsError::Invalid {
                    key: "source",
                    reason: format!("expected 'rtsp' or 'synthetic', got '{other}'"),
                })
            }
        };
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(SettingsError::Invalid {
                key: "jpeg_quality",
                reason: format!("{} is outside 1..=100", self.jpeg_quality),
            });
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(SettingsError::Invalid {
                key: "shutdown_timeout_ms",
                reason: "must be positive".into(),
            });
        }

        Ok(Config {
            camera: Credentials::new(self.ip, self.user, self.pass),
            rgb: StreamProfile::new(self.rgb_profile, RGB_CHANNEL, Some(RGB_EXPECTED_FPS)),
            thermal: StreamProfile::new(self.thermal_profile, THERMAL_CHANNEL, Some(THERMAL_EXPECTED_FPS)),
            server: ServerConfig { bind: self.bind },
            capture: CaptureConfig {
                source,
                reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
                shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
                transport,
                jpeg_quality: self.jpeg_quality,
            },
            temperature: TemperatureConfig {
                timeout: Duration::from_millis(self.temperature_timeout_ms),
            },
        })
    }
}
