// Payload decoding
//
// Every transport frames readings differently but they all end up as the same
// `Reading`:
// - Bluetooth: 12-byte little-endian struct (f32 temperature, humidity,
//   pressure), optionally followed by an i64 Unix-millisecond timestamp.
//   Older firmware notifies the JSON object form instead.
// - WiFi: JSON object {"temperature", "humidity", "pressure", "timestamp"}
// - Serial: one line, either the JSON object form or delimited text
//   `temperature,humidity,pressure[,unix_seconds]`

use crate::error::DecodeError;
use crate::transport::{Medium, RawPayload};
use crate::types::Reading;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

const BINARY_READING_LEN: usize = 12;
const BINARY_TIMESTAMPED_LEN: usize = 20;

pub fn decode(raw: &RawPayload) -> Result<Reading, DecodeError> {
    decode_bytes(&raw.bytes, raw.medium, raw.received_at)
}

/// Decode `bytes` using the framing of `medium`. `received_at` stands in for
/// the observation time when the payload does not carry one.
pub fn decode_bytes(
    bytes: &[u8],
    medium: Medium,
    received_at: DateTime<Utc>,
) -> Result<Reading, DecodeError> {
    match medium {
        Medium::Bluetooth if looks_like_json(bytes) => decode_json(bytes, received_at),
        Medium::Bluetooth => decode_binary(bytes, received_at),
        Medium::WiFi => decode_json(bytes, received_at),
        Medium::Serial => {
            let line = std::str::from_utf8(bytes)?.trim();
            if line.starts_with('{') {
                decode_json(line.as_bytes(), received_at)
            } else {
                decode_delimited(line, received_at)
            }
        }
    }
}

fn looks_like_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

fn decode_binary(bytes: &[u8], received_at: DateTime<Utc>) -> Result<Reading, DecodeError> {
    let observed_at = match bytes.len() {
        BINARY_READING_LEN => received_at,
        BINARY_TIMESTAMPED_LEN => {
            let mut millis = [0u8; 8];
            millis.copy_from_slice(&bytes[12..20]);
            let millis = i64::from_le_bytes(millis);
            DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| DecodeError::InvalidTimestamp(millis.to_string()))?
        }
        other => return Err(DecodeError::Length(other)),
    };

    Reading::new(
        f32_at(bytes, 0),
        f32_at(bytes, 4),
        f32_at(bytes, 8),
        observed_at,
    )
}

fn f32_at(bytes: &[u8], offset: usize) -> f32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_le_bytes(buf)
}

#[derive(Debug, Deserialize)]
struct WireReading {
    temperature: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
    #[serde(default)]
    timestamp: Option<Value>,
}

fn decode_json(bytes: &[u8], received_at: DateTime<Utc>) -> Result<Reading, DecodeError> {
    let wire: WireReading = serde_json::from_slice(bytes)?;

    let temperature = wire
        .temperature
        .ok_or(DecodeError::MissingField("temperature"))?;
    let humidity = wire.humidity.ok_or(DecodeError::MissingField("humidity"))?;
    let pressure = wire.pressure.ok_or(DecodeError::MissingField("pressure"))?;

    let observed_at = match wire.timestamp {
        None | Some(Value::Null) => received_at,
        Some(Value::String(text)) => parse_timestamp(&text)?,
        Some(Value::Number(number)) => number
            .as_f64()
            .and_then(from_unix_seconds)
            .ok_or_else(|| DecodeError::InvalidTimestamp(number.to_string()))?,
        Some(other) => return Err(DecodeError::InvalidTimestamp(other.to_string())),
    };

    Reading::new(
        temperature as f32,
        checked_humidity(humidity)?,
        pressure as f32,
        observed_at,
    )
}

fn decode_delimited(line: &str, received_at: DateTime<Utc>) -> Result<Reading, DecodeError> {
    let fields: Vec<&str> = line
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|field| !field.is_empty())
        .collect();

    if fields.len() != 3 && fields.len() != 4 {
        return Err(DecodeError::FieldCount(fields.len()));
    }

    let temperature = parse_field("temperature", fields[0])?;
    let humidity = parse_field("humidity", fields[1])?;
    let pressure = parse_field("pressure", fields[2])?;

    let observed_at = match fields.get(3) {
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .and_then(from_unix_seconds)
            .ok_or_else(|| DecodeError::InvalidTimestamp(raw.to_string()))?,
        None => received_at,
    };

    Reading::new(
        temperature as f32,
        checked_humidity(humidity)?,
        pressure as f32,
        observed_at,
    )
}

fn parse_field(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    raw.parse::<f64>().map_err(|_| DecodeError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

/// Range-check humidity at wire precision; narrowing first would round
/// values just above 100 down into range.
fn checked_humidity(humidity: f64) -> Result<f32, DecodeError> {
    if humidity.is_finite() && !(0.0..=100.0).contains(&humidity) {
        return Err(DecodeError::HumidityOutOfRange(humidity));
    }
    Ok(humidity as f32)
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DD HH:MM:SS[.fff]` (taken as UTC)
fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DecodeError> {
    let text = text.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DecodeError::InvalidTimestamp(text.to_string()))
}

fn from_unix_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}
