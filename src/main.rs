//! Sentry Vision: camera capture and on-device classification

use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};

use sentry_vision::capture::SensorModel;
use sentry_vision::pipeline::LogSink;
use sentry_vision::sim::{DominantColorEngine, SimulatedSensor};
use sentry_vision::{Config, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Sentry Vision launching...");

    // Load configuration
    let config_path = std::env::var_os("VISION_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!(
        format = ?config.sensor.pixel_format,
        size = ?config.sensor.frame_size,
        buffers = config.sensor.buffer_count,
        "configuration loaded"
    );

    // No camera bus on the host: drive the pipeline from the simulated sensor.
    let sensor = SimulatedSensor::new(SensorModel::Ov3660)
        .with_frame_interval(std::time::Duration::from_millis(33));

    let pipeline = match Pipeline::start(&config, Box::new(sensor), DominantColorEngine, LogSink) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            // Do not proceed past an unconfigured sensor.
            error!(cause = %e, "halted");
            return Err(eyre!("pipeline halted: {e}"));
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");

    let report = tokio::task::spawn_blocking(move || pipeline.stop()).await??;
    info!(
        captured = report.captured,
        classified = report.classified,
        dropped = report.dropped,
        "Sentry Vision shutting down"
    );
    Ok(())
}

#[cfg(not(feature = "profiling"))]
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentry_vision=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

#[cfg(feature = "profiling")]
fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentry_vision=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
        .with(tracing_tracy::TracyLayer::default())
        .init();
}
