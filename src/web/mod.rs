//! HTTP surface: live video, health and temperature lookups

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::capture::StreamHandle;
use crate::temperature::TemperatureSource;

pub mod handlers;

#[derive(Clone)]
pub struct AppState {
    pub streams: Arc<HashMap<String, Arc<StreamHandle>>>,
    pub temperature: Arc<dyn TemperatureSource>,
}

impl AppState {
    /// Streams are addressed by their name under `/video/{name}`.
    pub fn new(streams: impl IntoIterator<Item = Arc<StreamHandle>>, temperature: Arc<dyn TemperatureSource>) -> Self {
        let streams = streams
            .into_iter()
            .map(|stream| (stream.name().to_string(), stream))
            .collect();
        Self {
            streams: Arc::new(streams),
            temperature,
        }
    }

    pub fn stream(&self, name: &str) -> Option<&Arc<StreamHandle>> {
        self.streams.get(name)
    }

    /// Stop every stream, ending all open video responses.
    pub async fn stop_streams(&self) {
        let streams = self.streams.clone();
        let _ = tokio::task::spawn_blocking(move || {
            for stream in streams.values() {
                stream.stop();
            }
        })
        .await;
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/healthz", get(handlers::healthz))
        .route("/video/:name", get(handlers::video))
        .route("/temperature", get(handlers::temperature))
        .route("/temperature/roi", get(handlers::temperature_roi))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain open connections.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
