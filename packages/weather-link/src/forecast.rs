// Long-horizon forecast service boundary
//
// The forecasting model lives outside this crate. `ForecastService` is the
// seam; `HttpForecastService` is the stock implementation that posts the
// latest sample as JSON and expects a `Forecast` back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// One projected sample in a forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedReading {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub projection: Vec<ProjectedReading>,
}

#[derive(Debug, Serialize)]
struct ForecastRequest {
    temperature: f32,
    humidity: f32,
    pressure: f32,
}

#[async_trait]
pub trait ForecastService: Send + Sync {
    async fn forecast(
        &self,
        temperature: f32,
        humidity: f32,
        pressure: f32,
    ) -> Result<Forecast, ForecastError>;
}

pub struct HttpForecastService {
    client: reqwest::Client,
    url: String,
}

impl HttpForecastService {
    pub fn new(url: impl Into<String>) -> Result<Self, ForecastError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ForecastService for HttpForecastService {
    async fn forecast(
        &self,
        temperature: f32,
        humidity: f32,
        pressure: f32,
    ) -> Result<Forecast, ForecastError> {
        let request = ForecastRequest {
            temperature,
            humidity,
            pressure,
        };

        log::debug!("Requesting forecast from {}", self.url);

        let resp = self.client.post(&self.url).json(&request).send().await?;
        if !resp.status().is_success() {
            return Err(ForecastError::InvalidResponse(format!(
                "{} returned {}",
                self.url,
                resp.status()
            )));
        }

        let forecast: Forecast = resp.json().await?;
        if let Some(confidence) = forecast.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(ForecastError::InvalidResponse(format!(
                    "confidence out of range: {}",
                    confidence
                )));
            }
        }
        Ok(forecast)
    }
}
