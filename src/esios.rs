//! ESIOS indicator client and payload parsing.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::normalize::PricePoint;
use crate::time_window::UtcWindow;

pub const ESIOS_INDICATOR_URL: &str = "https://api.esios.ree.es/indicators/1001";
pub const ESIOS_ACCEPT_HEADER: &str = "application/json; application/vnd.esios-api-v2+json";
pub const ERROR_BODY_PREVIEW_CHARS: usize = 1_200;

const USER_AGENT: &str = concat!("pvpc-auto-fill/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorRequest {
    pub geo_id: u32,
    pub window: UtcWindow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPayload {
    pub unit_label: String,
    pub readings: Vec<PricePoint>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client build error: {0}")]
    ClientBuild(String),
    #[error("invalid request URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("HTTP request failed for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("HTTP {status} from ESIOS\nURL: {url}\nBody (first 1200 chars):\n{body}")]
    Status { status: u16, url: String, body: String },
    #[error("invalid JSON payload from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Anything that can answer an indicator request; the sync pipeline only
/// depends on this.
pub trait IndicatorSource {
    fn fetch(&self, req: &IndicatorRequest) -> Result<IndicatorPayload, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsiosConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl EsiosConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: ESIOS_INDICATOR_URL.to_string(),
            api_key: api_key.into(),
            timeout_ms: 60_000,
        }
    }
}

/// `ESIOS_API_KEY`, falling back to `ESIOS_TOKEN`. Blank values count as missing.
pub fn esios_api_key_from_env() -> Option<String> {
    ["ESIOS_API_KEY", "ESIOS_TOKEN"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|raw| raw.trim().to_string())
        .find(|raw| !raw.is_empty())
}

pub struct EsiosClient {
    client: reqwest::blocking::Client,
    cfg: EsiosConfig,
}

impl EsiosClient {
    pub fn new(cfg: EsiosConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| FetchError::ClientBuild(err.to_string()))?;
        Ok(Self { client, cfg })
    }

    pub fn request_url(&self, req: &IndicatorRequest) -> Result<Url, FetchError> {
        build_request_url(&self.cfg.base_url, req)
    }
}

impl IndicatorSource for EsiosClient {
    fn fetch(&self, req: &IndicatorRequest) -> Result<IndicatorPayload, FetchError> {
        let url = self.request_url(req)?;
        info!(
            component = "esios",
            event = "esios.request",
            geo_id = req.geo_id,
            start = %req.window.start_iso(),
            end = %req.window.end_iso()
        );

        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, ESIOS_ACCEPT_HEADER)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.cfg.api_key)
            .send()
            .map_err(|err| FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response.text().map_err(|err| FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: truncate_chars(&body, ERROR_BODY_PREVIEW_CHARS),
            });
        }

        let payload: Value = serde_json::from_str(&body).map_err(|err| FetchError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        Ok(parse_indicator_payload(&payload))
    }
}

pub fn build_request_url(base_url: &str, req: &IndicatorRequest) -> Result<Url, FetchError> {
    let geo_id = req.geo_id.to_string();
    Url::parse_with_params(
        base_url,
        &[
            ("start_date", req.window.start_iso()),
            ("end_date", req.window.end_iso()),
            ("geo_ids[]", geo_id),
        ],
    )
    .map_err(|err| FetchError::InvalidUrl {
        url: base_url.to_string(),
        message: err.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    indicator: Option<RawIndicator>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIndicator {
    unit: Option<Value>,
    magnitud: Option<Value>,
    magnitude: Option<Value>,
    values: Option<Vec<Value>>,
}

/// Extracts the unit label and the well-formed readings, sorted by instant.
/// Malformed readings are dropped.
pub fn parse_indicator_payload(payload: &Value) -> IndicatorPayload {
    let raw: RawPayload = RawPayload::deserialize(payload).unwrap_or_default();
    let indicator = raw.indicator.unwrap_or_default();

    let unit_label = [&indicator.unit, &indicator.magnitud, &indicator.magnitude]
        .into_iter()
        .find_map(|candidate| candidate.as_ref().and_then(unit_text))
        .unwrap_or_default();

    let values = indicator.values.unwrap_or_default();
    let total = values.len();
    let mut readings: Vec<PricePoint> = values.iter().filter_map(parse_reading).collect();
    readings.sort_by_key(|point| point.instant);

    let dropped = total - readings.len();
    if dropped > 0 {
        debug!(
            component = "esios",
            event = "esios.readings_dropped",
            dropped,
            kept = readings.len()
        );
    }

    IndicatorPayload {
        unit_label,
        readings,
    }
}

fn unit_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.to_string()),
    }
}

fn parse_reading(entry: &Value) -> Option<PricePoint> {
    let timestamp = ["datetime_utc", "datetime"]
        .iter()
        .filter_map(|key| entry.get(*key))
        .find(|value| !value.is_null() && value.as_str() != Some(""))?;
    let instant = parse_instant(timestamp.as_str()?)?;
    let value = parse_number(entry.get("value")?)?;
    Some(PricePoint { instant, value })
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
