//! GeoVision dual-stream HTTP server

use std::net::SocketAddr;
use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use geovision_streamer::capture::{backend_for, CaptureOptions};
use geovision_streamer::temperature::TemperatureClient;
use geovision_streamer::web::{self, AppState};
use geovision_streamer::config as settings;
use geovision_streamer::StreamHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geovision_streamer=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| settings::DEFAULT_FILE.to_string());
    let config = settings::load(&path).wrap_err_with(|| format!("Failed to load configuration from {path}"))?;
    info!(camera = ?config.camera, source = ?config.capture.source, "GeoVision streamer launching");

    let backend = backend_for(config.capture.source);
    let options = CaptureOptions::from(config.capture.clone());
    let rgb = Arc::new(StreamHandle::new(
        "rgb",
        config.rgb.clone(),
        config.camera.clone(),
        options.clone(),
        backend.clone(),
    ));
    let thermal = Arc::new(StreamHandle::new(
        "thermal",
        config.thermal.clone(),
        config.camera.clone(),
        options,
        backend,
    ));
    rgb.start().wrap_err("Failed to start rgb stream")?;
    thermal.start().wrap_err("Failed to start thermal stream")?;

    let sensor = Arc::new(TemperatureClient::new(
        config.camera.clone(),
        config.thermal.channel,
        config.temperature.timeout,
    ));
    let state = AppState::new([rgb, thermal], sensor);

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .wrap_err_with(|| format!("Invalid bind address {}", config.server.bind))?;

    let shutdown = {
        let state = state.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested, stopping streams");
            state.stop_streams().await;
        }
    };

    web::serve(state.clone(), addr, shutdown).await.wrap_err("HTTP server failed")?;
    state.stop_streams().await;
    info!("Shutdown complete");
    Ok(())
}
