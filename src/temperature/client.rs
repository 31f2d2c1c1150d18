use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use tracing::{debug, instrument, warn};

use super::{parse_dot_response, parse_roi_response, DotReading, Result, RoiStats, TemperatureError, TemperatureSource};
use crate::camera::Credentials;

/// Blocking client for the camera's temperature endpoints.
pub struct TemperatureClient {
    credentials: Credentials,
    channel: u32,
    agent: ureq::Agent,
    authorization: String,
}

impl TemperatureClient {
    pub fn new(credentials: Credentials, channel: u32, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let token = general_purpose::STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
        Self {
            credentials,
            channel,
            agent,
            authorization: format!("Basic {token}"),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        self.credentials.http_url(&format!("{}/{}", endpoint, self.channel))
    }

    fn read_body(url: &str, response: std::result::Result<ureq::Response, ureq::Error>) -> Result<String> {
        match response {
            Ok(resp) => resp.into_string().map_err(|e| TemperatureError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                warn!(%url, status, body = %body.chars().take(200).collect::<String>(), "Camera rejected request");
                Err(TemperatureError::Status {
                    url: url.to_string(),
                    status,
                })
            }
            Err(e) => Err(TemperatureError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

fn dot_request_body(x: u32, y: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<config version="1.0" xmlns="http://www.ipc.com/ver10">
    <dotTemperature>
        <hotX>{x}</hotX>
        <hotY>{y}</hotY>
    </dotTemperature>
</config>"#
    )
}

impl TemperatureSource for TemperatureClient {
    #[instrument(skip(self), fields(channel = self.channel))]
    fn dot_temperature(&self, x: u32, y: u32) -> Result<DotReading> {
        let url = self.url("GetDotTemperature");
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &self.authorization)
            .set("Content-Type", "application/xml")
            .send_string(&dot_request_body(x, y));
        let body = Self::read_body(&url, response)?;
        let reading = parse_dot_response(&body).map_err(|e| {
            debug!(error = %e, body = %body.chars().take(500).collect::<String>(), "Unparseable dot response");
            e
        })?;
        debug!(temperature = reading.temperature_c, x = reading.x, y = reading.y, "Dot temperature");
        Ok(reading)
    }

    #[instrument(skip(self), fields(channel = self.channel))]
    fn roi_stats(&self) -> Result<RoiStats> {
        let url = self.url("GetTemperatureCurrentInfo");
        let response = self.agent.get(&url).set("Authorization", &self.authorization).call();
        let body = Self::read_body(&url, response)?;
        parse_roi_response(&body)
    }
}
