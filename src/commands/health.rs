use crate::sensor::subscription::SubscriptionManager;
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub transport: &'static str,
}

pub fn build_health_response(
    started_at: Instant,
    subscriptions: &SubscriptionManager,
) -> HealthResponse {
    let transport_status = if subscriptions.is_connected() {
        "connected"
    } else {
        "disconnected"
    };

    HealthResponse {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        transport: transport_status,
    }
}

pub async fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    Ok(build_health_response(state.started_at, &state.subscriptions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::testing::ChannelTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn health_reports_ok_status_and_transport_state() {
        let subscriptions = Arc::new(SubscriptionManager::new(Arc::new(
            ChannelTransport::default(),
        )));

        let response = build_health_response(Instant::now(), &subscriptions);
        assert_eq!(response.status, "ok");
        assert_eq!(response.transport, "disconnected");
        assert!(response.uptime_ms <= 1_000);

        subscriptions
            .connect("http://push")
            .await
            .expect("scripted transport connects");
        let response = build_health_response(Instant::now(), &subscriptions);
        assert_eq!(response.transport, "connected");
    }
}
