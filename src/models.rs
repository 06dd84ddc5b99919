//! Typed telemetry records
//!
//! The remote collection stores coordinates either as numbers or as numeric
//! strings. Everything is coerced exactly once, in [`MotorcycleReading::from_raw`];
//! the rest of the crate only ever sees `f64`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// "Unknown location" latitude used when the remote value is missing or invalid
pub const DEFAULT_LATITUDE: f64 = -2.9636;

/// "Unknown location" longitude used when the remote value is missing or invalid
pub const DEFAULT_LONGITUDE: f64 = 104.7456;

/// Vibration status meaning "vibration detected"
pub const VIBRATION_SENTINEL: &str = "Ada Getaran";

/// One GPS + vibration + signal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorcycleReading {
    pub latitude: f64,
    pub longitude: f64,
    pub time: String,
    pub vibration: String,
    pub signal: i64,
}

impl Default for MotorcycleReading {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            time: String::new(),
            vibration: String::new(),
            signal: 0,
        }
    }
}

impl MotorcycleReading {
    /// Build a reading from an untyped remote record.
    ///
    /// Never fails: anything that is not an object is treated as a record
    /// with every field missing.
    pub fn from_raw(raw: &Value) -> Self {
        let field = |name: &str| raw.as_object().and_then(|fields| fields.get(name));

        Self {
            latitude: coerce_coordinate(field("latitude"), DEFAULT_LATITUDE),
            longitude: coerce_coordinate(field("longitude"), DEFAULT_LONGITUDE),
            time: coerce_text(field("time")),
            vibration: coerce_text(field("vibration")),
            signal: coerce_signal(field("signal")),
        }
    }

    pub fn vibration_detected(&self) -> bool {
        self.vibration == VIBRATION_SENTINEL
    }
}

/// The reading of the active device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CurrentLocation {
    pub device_id: String,
    #[serde(flatten)]
    pub reading: MotorcycleReading,
}

impl CurrentLocation {
    pub fn new(device_id: impl Into<String>, reading: MotorcycleReading) -> Self {
        Self {
            device_id: device_id.into(),
            reading,
        }
    }

    pub fn has_device(&self) -> bool {
        !self.device_id.is_empty()
    }
}

/// A record of any device other than the active one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalLocation {
    pub id: String,
    #[serde(flatten)]
    pub reading: MotorcycleReading,
}

impl HistoricalLocation {
    pub fn new(id: impl Into<String>, reading: MotorcycleReading) -> Self {
        Self {
            id: id.into(),
            reading,
        }
    }
}

/// Coerce a number or numeric string to a coordinate, falling back on
/// absent, unparsable, NaN or infinite values.
pub fn coerce_coordinate(value: Option<&Value>, fallback: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_float_prefix(s),
        _ => None,
    };

    parsed.filter(|v| v.is_finite()).unwrap_or(fallback)
}

/// Parse the longest leading decimal number of `input`, the way device
/// firmware strings like `"-2.99 "` or `"104.75E"` are meant to be read.
pub fn parse_float_prefix(input: &str) -> Option<f64> {
    let s = input.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }

    if digits == 0 {
        return None;
    }

    // optional exponent, only taken when complete
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && matches!(bytes[exp_end], b'+' | b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

fn coerce_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn coerce_signal(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_string_coordinates_are_parsed() {
        let reading = MotorcycleReading::from_raw(&json!({
            "latitude": "1.5",
            "longitude": "-2.25",
        }));

        assert_eq!(reading.latitude, 1.5);
        assert_eq!(reading.longitude, -2.25);
    }

    #[test]
    fn numeric_coordinates_are_kept() {
        let reading = MotorcycleReading::from_raw(&json!({"latitude": 3, "longitude": 4.5}));

        assert_eq!(reading.latitude, 3.0);
        assert_eq!(reading.longitude, 4.5);
    }

    #[test]
    fn empty_record_gets_every_default() {
        let reading = MotorcycleReading::from_raw(&json!({}));

        assert_eq!(reading, MotorcycleReading::default());
        assert_eq!(reading.latitude, -2.9636);
        assert_eq!(reading.longitude, 104.7456);
        assert_eq!(reading.time, "");
        assert_eq!(reading.vibration, "");
        assert_eq!(reading.signal, 0);
    }

    #[test]
    fn non_object_record_is_treated_as_empty() {
        assert_eq!(MotorcycleReading::from_raw(&json!(1)), MotorcycleReading::default());
        assert_eq!(MotorcycleReading::from_raw(&Value::Null), MotorcycleReading::default());
    }

    #[test]
    fn unparsable_coordinates_fall_back() {
        let reading = MotorcycleReading::from_raw(&json!({
            "latitude": "abc",
            "longitude": null,
        }));

        assert_eq!(reading.latitude, DEFAULT_LATITUDE);
        assert_eq!(reading.longitude, DEFAULT_LONGITUDE);
    }

    #[test]
    fn zero_is_a_valid_coordinate() {
        let reading = MotorcycleReading::from_raw(&json!({"latitude": 0, "longitude": "0"}));

        assert_eq!(reading.latitude, 0.0);
        assert_eq!(reading.longitude, 0.0);
    }

    #[test]
    fn coordinate_of_wrong_type_falls_back() {
        assert_eq!(coerce_coordinate(Some(&json!(true)), 7.0), 7.0);
        assert_eq!(coerce_coordinate(Some(&json!([1.0])), 7.0), 7.0);
        assert_eq!(coerce_coordinate(None, 7.0), 7.0);
    }

    #[test]
    fn float_prefix_parsing() {
        assert_eq!(parse_float_prefix("12.5N"), Some(12.5));
        assert_eq!(parse_float_prefix("  -2.9636"), Some(-2.9636));
        assert_eq!(parse_float_prefix(".5"), Some(0.5));
        assert_eq!(parse_float_prefix("7."), Some(7.0));
        assert_eq!(parse_float_prefix("1e3"), Some(1000.0));
        assert_eq!(parse_float_prefix("1e"), Some(1.0));
        assert_eq!(parse_float_prefix("NaN"), None);
        assert_eq!(parse_float_prefix("-"), None);
        assert_eq!(parse_float_prefix("."), None);
        assert_eq!(parse_float_prefix(""), None);
    }

    #[test]
    fn infinite_coordinate_falls_back() {
        assert_eq!(coerce_coordinate(Some(&json!("1e999")), 5.0), 5.0);
    }

    #[test]
    fn signal_defaults_and_integers() {
        assert_eq!(coerce_signal(Some(&json!(17))), 17);
        assert_eq!(coerce_signal(Some(&json!(3.9))), 3);
        assert_eq!(coerce_signal(Some(&json!("5"))), 0);
        assert_eq!(coerce_signal(None), 0);
    }

    #[test]
    fn text_fields() {
        let reading = MotorcycleReading::from_raw(&json!({
            "time": "2024-05-01 10:00:00",
            "vibration": "Tidak Ada Getaran",
        }));
        assert_eq!(reading.time, "2024-05-01 10:00:00");
        assert!(!reading.vibration_detected());

        assert_eq!(coerce_text(Some(&json!(42))), "42");
        assert_eq!(coerce_text(Some(&json!({"nested": 1}))), "");
    }

    #[test]
    fn vibration_sentinel_must_match_exactly() {
        let alert = MotorcycleReading {
            vibration: "Ada Getaran".to_string(),
            ..MotorcycleReading::default()
        };
        let lowercase = MotorcycleReading {
            vibration: "ada getaran".to_string(),
            ..MotorcycleReading::default()
        };

        assert!(alert.vibration_detected());
        assert!(!lowercase.vibration_detected());
    }

    #[test]
    fn current_location_serializes_flat_camel_case() {
        let location = CurrentLocation::new("A", MotorcycleReading::default());
        let json = serde_json::to_value(&location).unwrap();

        assert_eq!(json["deviceId"], "A");
        assert_eq!(json["latitude"], -2.9636);
        assert_eq!(json["signal"], 0);
    }

    #[test]
    fn default_current_location_has_no_device() {
        let location = CurrentLocation::default();
        assert!(!location.has_device());
        assert_eq!(location.reading, MotorcycleReading::default());
    }
}
