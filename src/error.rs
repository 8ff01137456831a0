use crate::sensor::types::SensorType;
use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("{sensor} fetch failed: {reason}")]
    FetchFailed { sensor: SensorType, reason: String },
    #[error("invalid timestamp: '{0}'")]
    InvalidTimestamp(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
}

impl AppError {
    pub fn fetch_failed(sensor: SensorType, reason: impl ToString) -> Self {
        Self::FetchFailed {
            sensor,
            reason: reason.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
