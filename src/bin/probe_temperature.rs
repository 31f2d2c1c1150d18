//! Query the thermal sensor once: ROI statistics and a single dot reading
//!
//! Usage: `probe_temperature [config.toml] [x y]`

use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use geovision_streamer::config as settings;
use geovision_streamer::temperature::{TemperatureClient, TemperatureSource};
use tracing_subscriber::EnvFilter;

const DEFAULT_PIXEL: (u32, u32) = (192, 144);

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geovision_streamer=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let path = args.first().cloned().unwrap_or_else(|| settings::DEFAULT_FILE.to_string());
    let (x, y) = match (args.get(1), args.get(2)) {
        (Some(x), Some(y)) => (
            x.parse().wrap_err("x must be a non-negative integer")?,
            y.parse().wrap_err("y must be a non-negative integer")?,
        ),
        (None, None) => DEFAULT_PIXEL,
        _ => return Err(eyre!("pass both x and y, or neither")),
    };

    let config = settings::load(&path).wrap_err_with(|| format!("Failed to load configuration from {path}"))?;
    let client = TemperatureClient::new(config.camera.clone(), config.thermal.channel, config.temperature.timeout);

    println!("Camera {} channel {}", config.camera.host, config.thermal.channel);
    match client.roi_stats() {
        Ok(stats) => {
            let show = |v: Option<f64>| v.map_or("-".to_string(), |c| format!("{c:.2} °C"));
            println!("ROI  min {}  max {}  avg {}", show(stats.min), show(stats.max), show(stats.avg));
        }
        Err(e) => println!("ROI  unavailable: {e}"),
    }

    let reading = client
        .dot_temperature(x, y)
        .wrap_err_with(|| format!("Dot temperature at ({x}, {y}) failed"))?;
    let echoed = if (reading.x, reading.y) == (x, y) {
        String::new()
    } else {
        format!(" (camera measured {}, {})", reading.x, reading.y)
    };
    println!("Dot  ({x}, {y}) = {:.2} °C{echoed}", reading.temperature_c);
    Ok(())
}
