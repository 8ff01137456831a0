use crate::error::AppError;
use crate::sensor::reconciler::{ActivationOutcome, ConsumerHandle};
use crate::sensor::types::{
    ConnectionState, Reading, SensorStatus, SensorStreamSession, SensorStreamStatusSnapshot,
    SensorStreamStopResult, SensorType,
};
use crate::state::AppState;
use tracing::{debug, info, warn};

/// Connects the push transport and brings both sensors live for the session
/// consumer. A failed connect or seed is logged and reported, not fatal.
pub async fn start_sensor_stream(state: &AppState) -> Result<SensorStreamSession, AppError> {
    if let Err(error) = state.subscriptions.connect(&state.config.socket_url).await {
        warn!(%error, "sensor stream starting without live updates");
    }
    state.reconciler.reattach_live();

    for sensor in SensorType::ALL {
        if let Err(error) = state.reconciler.refresh_latest(sensor).await {
            debug!(sensor = %sensor, %error, "keeping previous latest reading");
        }
    }

    for sensor in SensorType::ALL {
        match state
            .reconciler
            .activate(sensor, state.session_consumer)
            .await
        {
            Ok(outcome) => info!(sensor = %sensor, ?outcome, "sensor activated"),
            Err(error) => debug!(sensor = %sensor, %error, "sensor live without seeded history"),
        }
    }

    Ok(SensorStreamSession::from_config(&state.config, true))
}

pub async fn stop_sensor_stream(state: &AppState) -> Result<SensorStreamStopResult, AppError> {
    let mut stopped = false;
    for sensor in SensorType::ALL {
        stopped |= state.reconciler.deactivate(sensor, state.session_consumer);
    }

    stopped |= state.subscriptions.connection_state() != ConnectionState::Disconnected;
    state.subscriptions.disconnect();

    Ok(SensorStreamStopResult { stopped })
}

pub async fn sensor_stream_status(
    state: &AppState,
) -> Result<SensorStreamStatusSnapshot, AppError> {
    let sensors = SensorType::ALL
        .into_iter()
        .map(|sensor| SensorStatus {
            sensor,
            phase: state.reconciler.phase(sensor),
            consumers: state.reconciler.consumer_count(sensor),
            history_len: state.registry.history_len(sensor),
            latest: state.registry.latest(sensor),
        })
        .collect();

    Ok(SensorStreamStatusSnapshot {
        connection: state.subscriptions.connection_state(),
        sensors,
    })
}

pub async fn sensor_latest(state: &AppState, sensor: SensorType) -> Result<Reading, AppError> {
    Ok(state.registry.latest(sensor))
}

pub async fn sensor_history(
    state: &AppState,
    sensor: SensorType,
) -> Result<Vec<Reading>, AppError> {
    Ok(state.registry.history(sensor))
}

pub async fn activate_consumer(
    state: &AppState,
    sensor: SensorType,
    consumer: ConsumerHandle,
) -> Result<ActivationOutcome, AppError> {
    state.reconciler.activate(sensor, consumer).await
}

pub async fn deactivate_consumer(
    state: &AppState,
    sensor: SensorType,
    consumer: ConsumerHandle,
) -> Result<bool, AppError> {
    Ok(state.reconciler.deactivate(sensor, consumer))
}
