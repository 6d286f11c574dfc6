use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw telemetry value.
///
/// JSON numbers map to `Double`, booleans to `Bool`, strings to `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Double(f64),
    Text(String),
}

impl Value {
    /// Numeric view used by comparisons. `true` is 1, `false` is 0 and
    /// numeric strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Double(d) if d.is_finite() => Some(*d),
            Value::Double(_) => None,
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|d| d.is_finite()),
        }
    }

    /// Boolean view used by `is_true` leaves.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Double(d) if d.is_finite() => Some(*d != 0.0),
            Value::Double(_) => None,
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" => Some(true),
                "false" | "off" => Some(false),
                other => other.parse::<f64>().ok().map(|d| d != 0.0),
            },
        }
    }

    /// Non-finite doubles never enter a buffer.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Value::Double(d) => d.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// One buffered sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

impl TimedValue {
    pub fn new(timestamp: DateTime<Utc>, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// A sample addressed to a point (sensor) identifier, as delivered by a
/// telemetry source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub point_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

impl TelemetryPoint {
    pub fn new(point_id: impl Into<String>, timestamp: DateTime<Utc>, value: impl Into<Value>) -> Self {
        Self {
            point_id: point_id.into(),
            timestamp,
            value: value.into(),
        }
    }

    pub fn timed_value(&self) -> TimedValue {
        TimedValue {
            timestamp: self.timestamp,
            value: self.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_json_shapes() {
        let v: Vec<Value> = serde_json::from_str(r#"[true, 1.5, 3, "on"]"#).unwrap();
        assert_eq!(v[0], Value::Bool(true));
        assert_eq!(v[1], Value::Double(1.5));
        assert_eq!(v[2], Value::Double(3.0));
        assert_eq!(v[3], Value::Text("on".into()));
    }

    #[test]
    fn coercions() {
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::Text(" 21.5 ".into()).as_f64(), Some(21.5));
        assert_eq!(Value::Text("warm".into()).as_f64(), None);
        assert_eq!(Value::Double(0.0).as_bool(), Some(false));
        assert_eq!(Value::Text("ON".into()).as_bool(), Some(true));
        assert_eq!(Value::Text("maybe".into()).as_bool(), None);
    }

    #[test]
    fn non_finite_is_malformed() {
        assert!(!Value::Double(f64::NAN).is_well_formed());
        assert!(!Value::Double(f64::INFINITY).is_well_formed());
        assert!(Value::Double(-3.0).is_well_formed());
        assert_eq!(Value::Double(f64::NAN).as_f64(), None);
    }
}
