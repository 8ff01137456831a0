pub mod commands;
pub mod error;
pub mod sensor;
pub mod state;

use commands::{
    health::health,
    sensor_stream::{sensor_stream_status, start_sensor_stream, stop_sensor_stream},
};
use crate::error::AppError;
use sensor::timestamp::format_time;
use sensor::types::{SensorType, StartSensorStreamArgs};
use state::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn serve(state: AppState) -> Result<(), AppError> {
    let (locale, offset) = (state.config.locale, state.config.utc_offset());
    for sensor in SensorType::ALL {
        state.registry.watch_latest(sensor, move |reading| {
            info!(
                sensor = %sensor,
                value = reading.value,
                unit = %reading.unit,
                at = %format_time(reading.timestamp, locale, offset),
                "reading"
            );
        });
    }
    state.reconciler.watch_failures(|failure| {
        warn!(sensor = %failure.sensor, error = %failure.error, "sensor failure observed");
    });

    let session = start_sensor_stream(&state).await?;
    info!(
        api_url = %session.api_url,
        socket_url = %session.socket_url,
        history_capacity = session.history_capacity,
        "sensor stream started"
    );

    tokio::signal::ctrl_c().await?;

    let status = sensor_stream_status(&state).await?;
    let health = health(&state).await?;
    info!(?status, uptime_ms = health.uptime_ms, "shutting down");
    stop_sensor_stream(&state).await?;
    Ok(())
}

pub fn run() {
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to build async runtime");
            return;
        }
    };

    let outcome = runtime.block_on(async {
        let config = StartSensorStreamArgs::default().normalize()?;
        let state = AppState::new(config)?;
        serve(state).await
    });

    if let Err(error) = outcome {
        error!(%error, "sensor stream exited with error");
        std::process::exit(1);
    }
}
