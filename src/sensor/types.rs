use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const API_URL_ENV: &str = "SENSOR_API_URL";
pub const SOCKET_URL_ENV: &str = "SENSOR_SOCKET_URL";
pub const DEFAULT_HISTORY_CAPACITY: usize = 60;
pub const MIN_HISTORY_CAPACITY: usize = 1;
pub const MAX_HISTORY_CAPACITY: usize = 10_000;
pub const DEFAULT_LOCALE: DisplayLocale = DisplayLocale::EsMx;
/// America/Mexico_City, which has not observed DST since 2022.
pub const DEFAULT_UTC_OFFSET_MINUTES: i16 = -360;
pub const MIN_UTC_OFFSET_MINUTES: i16 = -720;
pub const MAX_UTC_OFFSET_MINUTES: i16 = 840;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Humidity,
}

impl SensorType {
    pub const ALL: [SensorType; 2] = [SensorType::Temperature, SensorType::Humidity];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "C",
            Self::Humidity => "%",
        }
    }

    /// Push channel carrying live readings for this sensor.
    pub fn channel(self) -> &'static str {
        match self {
            Self::Temperature => "temperature:update",
            Self::Humidity => "humidity:update",
        }
    }

    pub fn placeholder_value(self) -> f64 {
        match self {
            Self::Temperature => 22.5,
            Self::Humidity => 65.0,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Temperature => 0,
            Self::Humidity => 1,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub value: f64,
    pub unit: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Reading {
    pub fn new(value: f64, unit: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self {
            value,
            unit: unit.into(),
            timestamp,
        }
    }

    pub fn placeholder(sensor: SensorType, now: OffsetDateTime) -> Self {
        Self::new(sensor.placeholder_value(), sensor.unit(), now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DisplayLocale {
    #[serde(rename = "es-MX")]
    EsMx,
    #[serde(rename = "en-US")]
    EnUs,
}

/// Body of `<type>:update` push events and of `GET /api/{type}/latest`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadingWire {
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    pub timestamp: String,
}

/// Item of `GET /api/{type}/last-15-minutes`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPointWire {
    pub value: f64,
    pub timestamp: String,
}

impl ReadingWire {
    pub fn into_reading(self, sensor: SensorType) -> Result<Reading, AppError> {
        let timestamp = crate::sensor::timestamp::normalize(&self.timestamp)?;
        let value = finite_value(self.value)?;
        let unit = self
            .unit
            .filter(|unit| !unit.trim().is_empty())
            .unwrap_or_else(|| sensor.unit().to_string());
        Ok(Reading::new(value, unit, timestamp))
    }
}

impl HistoryPointWire {
    pub fn into_reading(self, sensor: SensorType) -> Result<Reading, AppError> {
        let timestamp = crate::sensor::timestamp::normalize(&self.timestamp)?;
        let value = finite_value(self.value)?;
        Ok(Reading::new(value, sensor.unit(), timestamp))
    }
}

fn finite_value(value: f64) -> Result<f64, AppError> {
    if !value.is_finite() {
        return Err(AppError::InvalidArgument(
            "reading value must be finite".to_string(),
        ));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilerPhase {
    Idle,
    Seeding,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartSensorStreamArgs {
    pub api_url: Option<String>,
    pub socket_url: Option<String>,
    pub history_capacity: Option<usize>,
    pub locale: Option<DisplayLocale>,
    pub utc_offset_minutes: Option<i16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorStreamConfig {
    pub api_url: String,
    pub socket_url: String,
    pub history_capacity: usize,
    pub locale: DisplayLocale,
    pub utc_offset_minutes: i16,
}

fn env_url(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_url(field: &str, raw: String) -> Result<String, AppError> {
    let url = raw.trim().trim_end_matches('/').to_string();
    let has_scheme = url.starts_with("http://") || url.starts_with("https://");
    if !has_scheme || url.len() <= "https://".len() {
        return Err(AppError::InvalidArgument(format!(
            "{field} must be an http(s) URL"
        )));
    }
    Ok(url)
}

impl StartSensorStreamArgs {
    pub fn normalize(self) -> Result<SensorStreamConfig, AppError> {
        let api_url = self
            .api_url
            .or_else(|| env_url(API_URL_ENV))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = normalize_url("apiUrl", api_url)?;

        let socket_url = match self.socket_url.or_else(|| env_url(SOCKET_URL_ENV)) {
            Some(raw) => normalize_url("socketUrl", raw)?,
            None => api_url.clone(),
        };

        let history_capacity = self.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY);
        if !(MIN_HISTORY_CAPACITY..=MAX_HISTORY_CAPACITY).contains(&history_capacity) {
            return Err(AppError::InvalidArgument(format!(
                "historyCapacity must be between {MIN_HISTORY_CAPACITY} and {MAX_HISTORY_CAPACITY}"
            )));
        }

        let utc_offset_minutes = self
            .utc_offset_minutes
            .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES);
        if !(MIN_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&utc_offset_minutes) {
            return Err(AppError::InvalidArgument(format!(
                "utcOffsetMinutes must be between {MIN_UTC_OFFSET_MINUTES} and {MAX_UTC_OFFSET_MINUTES}"
            )));
        }

        Ok(SensorStreamConfig {
            api_url,
            socket_url,
            history_capacity,
            locale: self.locale.unwrap_or(DEFAULT_LOCALE),
            utc_offset_minutes,
        })
    }
}

impl SensorStreamConfig {
    pub fn utc_offset(&self) -> time::UtcOffset {
        time::UtcOffset::from_whole_seconds(i32::from(self.utc_offset_minutes) * 60)
            .unwrap_or(time::UtcOffset::UTC)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStreamSession {
    pub running: bool,
    pub api_url: String,
    pub socket_url: String,
    pub history_capacity: usize,
    pub locale: DisplayLocale,
    pub utc_offset_minutes: i16,
}

impl SensorStreamSession {
    pub fn from_config(config: &SensorStreamConfig, running: bool) -> Self {
        Self {
            running,
            api_url: config.api_url.clone(),
            socket_url: config.socket_url.clone(),
            history_capacity: config.history_capacity,
            locale: config.locale,
            utc_offset_minutes: config.utc_offset_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStatus {
    pub sensor: SensorType,
    pub phase: ReconcilerPhase,
    pub consumers: usize,
    pub history_len: usize,
    pub latest: Reading,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStreamStatusSnapshot {
    pub connection: ConnectionState,
    pub sensors: Vec<SensorStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStreamStopResult {
    pub stopped: bool,
}
