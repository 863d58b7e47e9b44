// Rule-based short-horizon weather prediction
//
// Thresholds are evaluated in a fixed precedence order and the first match
// wins. Everything here is a pure function of its inputs.

use crate::types::{Prediction, PredictionLabel, Reading};

pub const HEAVY_RAIN_MIN_HUMIDITY: f32 = 80.0;
pub const HEAVY_RAIN_MAX_PRESSURE: f32 = 1000.0;
pub const LIGHT_RAIN_MIN_HUMIDITY: f32 = 70.0;
pub const LIGHT_RAIN_MAX_PRESSURE: f32 = 1010.0;
pub const CLEAR_MAX_HUMIDITY: f32 = 40.0;

/// Pressure change (hPa) across the window that moves confidence from 0.5 to its bound
const TREND_SCALE_HPA: f32 = 10.0;
const MIN_CONFIDENCE: f32 = 0.05;
const MAX_CONFIDENCE: f32 = 0.95;

/// Classify a single sample. Temperature does not take part in the rules.
pub fn predict(_temperature: f32, humidity: f32, pressure: f32) -> Prediction {
    Prediction {
        label: classify(humidity, pressure),
        confidence: None,
    }
}

pub fn predict_reading(reading: &Reading) -> Prediction {
    predict(reading.temperature(), reading.humidity(), reading.pressure())
}

/// Classify the newest reading in `window` (ordered oldest to newest) and
/// attach a confidence derived from the pressure trend across the window.
///
/// Falling pressure supports rain labels, rising pressure supports clear and
/// stable ones. Returns `None` for an empty window; with a single reading the
/// confidence is `None`.
pub fn predict_window(window: &[Reading]) -> Option<Prediction> {
    let newest = window.last()?;
    let mut prediction = predict_reading(newest);

    if window.len() >= 2 {
        let oldest = &window[0];
        let delta = newest.pressure() - oldest.pressure();
        let support = if prediction.label.is_rain() { -delta } else { delta };
        let confidence = (0.5 + 0.5 * support / TREND_SCALE_HPA).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
        prediction.confidence = Some(confidence);
    }

    Some(prediction)
}

fn classify(humidity: f32, pressure: f32) -> PredictionLabel {
    if humidity > HEAVY_RAIN_MIN_HUMIDITY && pressure < HEAVY_RAIN_MAX_PRESSURE {
        PredictionLabel::HeavyRainLikely
    } else if humidity > LIGHT_RAIN_MIN_HUMIDITY && pressure < LIGHT_RAIN_MAX_PRESSURE {
        PredictionLabel::LightRainPossible
    } else if humidity < CLEAR_MAX_HUMIDITY {
        PredictionLabel::Clear
    } else {
        PredictionLabel::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(humidity: f32, pressure: f32) -> Reading {
        Reading::new(20.0, humidity, pressure, Utc::now()).unwrap()
    }

    #[test]
    fn test_reference_cases() {
        assert_eq!(predict(15.0, 85.0, 950.0).label, PredictionLabel::HeavyRainLikely);
        assert_eq!(predict(15.0, 75.0, 1005.0).label, PredictionLabel::LightRainPossible);
        assert_eq!(predict(15.0, 30.0, 1015.0).label, PredictionLabel::Clear);
        assert_eq!(predict(15.0, 60.0, 1015.0).label, PredictionLabel::Stable);
    }

    #[test]
    fn test_precedence_heavy_before_light() {
        // Satisfies both rain rules; the heavy one must win
        assert_eq!(predict(0.0, 90.0, 990.0).label, PredictionLabel::HeavyRainLikely);
    }

    #[test]
    fn test_thresholds_are_strict() {
        assert_eq!(predict(0.0, 80.0, 999.0).label, PredictionLabel::LightRainPossible);
        assert_eq!(predict(0.0, 85.0, 1000.0).label, PredictionLabel::LightRainPossible);
        assert_eq!(predict(0.0, 70.0, 1005.0).label, PredictionLabel::Stable);
        assert_eq!(predict(0.0, 75.0, 1010.0).label, PredictionLabel::Stable);
        assert_eq!(predict(0.0, 40.0, 1020.0).label, PredictionLabel::Stable);
    }

    #[test]
    fn test_humid_but_high_pressure_is_stable() {
        assert_eq!(predict(0.0, 95.0, 1025.0).label, PredictionLabel::Stable);
    }

    #[test]
    fn test_deterministic() {
        for _ in 0..10 {
            assert_eq!(predict(21.0, 72.5, 1008.0), predict(21.0, 72.5, 1008.0));
        }
        assert!(predict(21.0, 72.5, 1008.0).confidence.is_none());
    }

    #[test]
    fn test_window_empty_and_single() {
        assert!(predict_window(&[]).is_none());

        let single = predict_window(&[reading(30.0, 1015.0)]).unwrap();
        assert_eq!(single.label, PredictionLabel::Clear);
        assert!(single.confidence.is_none());
    }

    #[test]
    fn test_window_uses_newest_reading_for_label() {
        let window = [reading(30.0, 1015.0), reading(85.0, 990.0)];
        assert_eq!(
            predict_window(&window).unwrap().label,
            PredictionLabel::HeavyRainLikely
        );
    }

    #[test]
    fn test_falling_pressure_raises_rain_confidence() {
        let falling = [reading(85.0, 998.0), reading(85.0, 994.0)];
        let rising = [reading(85.0, 990.0), reading(85.0, 994.0)];

        let falling = predict_window(&falling).unwrap().confidence.unwrap();
        let rising = predict_window(&rising).unwrap().confidence.unwrap();
        assert!(falling > 0.5);
        assert!(rising < 0.5);
    }

    #[test]
    fn test_confidence_is_bounded() {
        let crash = [reading(85.0, 1009.0), reading(85.0, 950.0)];
        let confidence = predict_window(&crash).unwrap().confidence.unwrap();
        assert_eq!(confidence, MAX_CONFIDENCE);

        let steady = [reading(60.0, 1015.0), reading(60.0, 1015.0)];
        assert_eq!(predict_window(&steady).unwrap().confidence, Some(0.5));
    }
}
