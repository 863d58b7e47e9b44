// Common types shared by the transports, the codec and the connection manager

use crate::error::DecodeError;
use crate::transport::Medium;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One normalized environmental sample.
///
/// Fields are private so a `Reading` can only be built through [`Reading::new`],
/// which rejects non-finite values and humidity outside `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    temperature: f32,
    humidity: f32,
    pressure: f32,
    observed_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        temperature: f32,
        humidity: f32,
        pressure: f32,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, DecodeError> {
        if !temperature.is_finite() {
            return Err(DecodeError::NonFinite("temperature"));
        }
        if !humidity.is_finite() {
            return Err(DecodeError::NonFinite("humidity"));
        }
        if !pressure.is_finite() {
            return Err(DecodeError::NonFinite("pressure"));
        }
        if !(0.0..=100.0).contains(&humidity) {
            return Err(DecodeError::HumidityOutOfRange(humidity.into()));
        }

        Ok(Self {
            temperature,
            humidity,
            pressure,
            observed_at,
        })
    }

    /// Degrees Celsius
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Relative humidity in percent
    pub fn humidity(&self) -> f32 {
        self.humidity
    }

    /// Barometric pressure in hPa
    pub fn pressure(&self) -> f32 {
        self.pressure
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} °C, {:.1} %, {:.1} hPa at {}",
            self.temperature,
            self.humidity,
            self.pressure,
            self.observed_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "data")]
pub enum ConnectionState {
    #[default]
    Disconnected,

    Connecting,

    Connected,

    /// The attempt or the stream failed; `reason` is meant to be shown verbatim
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ConnectionState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed { reason } => write!(f, "Failed ({})", reason),
        }
    }
}

/// Short-horizon weather category produced by the rule engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionLabel {
    HeavyRainLikely,
    LightRainPossible,
    Clear,
    Stable,
}

impl PredictionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionLabel::HeavyRainLikely => "heavy rain likely",
            PredictionLabel::LightRainPossible => "light rain possible",
            PredictionLabel::Clear => "clear",
            PredictionLabel::Stable => "stable",
        }
    }

    pub fn is_rain(&self) -> bool {
        matches!(
            self,
            PredictionLabel::HeavyRainLikely | PredictionLabel::LightRainPossible
        )
    }
}

impl fmt::Display for PredictionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: PredictionLabel,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.confidence {
            Some(confidence) => write!(f, "{} (confidence {:.2})", self.label, confidence),
            None => write!(f, "{}", self.label),
        }
    }
}

/// Events delivered to subscribers of a `ConnectionManager`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LinkEvent {
    StateChanged(ConnectionState),

    Reading(Reading),

    Prediction(Prediction),

    /// A payload arrived but could not be decoded; the stream keeps running
    DecodeFailed { medium: Medium, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_accepts_humidity_bounds() {
        let now = Utc::now();
        assert!(Reading::new(20.0, 0.0, 1013.0, now).is_ok());
        assert!(Reading::new(20.0, 100.0, 1013.0, now).is_ok());
    }

    #[test]
    fn test_reading_rejects_out_of_range_humidity() {
        let err = Reading::new(20.0, 100.5, 1013.0, Utc::now()).unwrap_err();
        assert!(matches!(err, DecodeError::HumidityOutOfRange(h) if h == 100.5));

        let err = Reading::new(20.0, -1.0, 1013.0, Utc::now()).unwrap_err();
        assert!(matches!(err, DecodeError::HumidityOutOfRange(_)));
    }

    #[test]
    fn test_reading_rejects_non_finite_values() {
        let now = Utc::now();
        assert!(matches!(
            Reading::new(f32::NAN, 50.0, 1013.0, now),
            Err(DecodeError::NonFinite("temperature"))
        ));
        assert!(matches!(
            Reading::new(20.0, f32::NAN, 1013.0, now),
            Err(DecodeError::NonFinite("humidity"))
        ));
        assert!(matches!(
            Reading::new(20.0, 50.0, f32::INFINITY, now),
            Err(DecodeError::NonFinite("pressure"))
        ));
    }

    #[test]
    fn test_state_serialization_is_tagged() {
        let json = serde_json::to_value(ConnectionState::Failed {
            reason: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "Failed");
        assert_eq!(json["data"]["reason"], "boom");
    }

    #[test]
    fn test_prediction_display() {
        let prediction = Prediction {
            label: PredictionLabel::LightRainPossible,
            confidence: Some(0.75),
        };
        assert_eq!(prediction.to_string(), "light rain possible (confidence 0.75)");
        assert_eq!(PredictionLabel::Stable.to_string(), "stable");
    }
}
