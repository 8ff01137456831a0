use crate::error::AppError;
use crate::sensor::types::{HistoryPointWire, ReadingWire, SensorType};
use futures_util::future::BoxFuture;
use reqwest::Client;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Pull side of the sensor backend.
pub trait SensorSource: Send + Sync {
    /// Readings from the last fifteen minutes, in no guaranteed order.
    fn recent_history(
        &self,
        sensor: SensorType,
    ) -> BoxFuture<'_, Result<Vec<HistoryPointWire>, AppError>>;

    fn latest(&self, sensor: SensorType) -> BoxFuture<'_, Result<ReadingWire, AppError>>;
}

fn recent_history_endpoint(base_url: &str, sensor: SensorType) -> String {
    format!("{base_url}/api/{}/last-15-minutes", sensor.as_str())
}

fn latest_endpoint(base_url: &str, sensor: SensorType) -> String {
    format!("{base_url}/api/{}/latest", sensor.as_str())
}

#[derive(Debug, Clone)]
pub struct RestSensorApi {
    client: Client,
    base_url: String,
}

impl RestSensorApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_recent_history(
        &self,
        sensor: SensorType,
    ) -> Result<Vec<HistoryPointWire>, AppError> {
        let endpoint = recent_history_endpoint(&self.base_url, sensor);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<Vec<HistoryPointWire>>().await?;
        Ok(payload)
    }

    pub async fn fetch_latest(&self, sensor: SensorType) -> Result<ReadingWire, AppError> {
        let endpoint = latest_endpoint(&self.base_url, sensor);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<ReadingWire>().await?;
        Ok(payload)
    }
}

impl SensorSource for RestSensorApi {
    fn recent_history(
        &self,
        sensor: SensorType,
    ) -> BoxFuture<'_, Result<Vec<HistoryPointWire>, AppError>> {
        Box::pin(self.fetch_recent_history(sensor))
    }

    fn latest(&self, sensor: SensorType) -> BoxFuture<'_, Result<ReadingWire, AppError>> {
        Box::pin(self.fetch_latest(sensor))
    }
}
