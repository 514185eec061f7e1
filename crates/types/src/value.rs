//! Scalar parameter values
//!
//! A `ParameterValue` is one concrete setting for a named parameter. The
//! `Display` impl is the canonical serialization used when handing values to
//! subprocess simulations: floats use the shortest round-tripping form,
//! integers are decimal, booleans lower-case, text verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A concrete parameter setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Real value
    Float(f64),
    /// Text value (categorical labels)
    Text(String),
}

impl ParameterValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// True for `Int` and `Float` values
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Variant name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    /// True if the value is a float NaN, which is never admissible
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Float(f) if f.is_nan())
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(ParameterValue::Float(0.1).to_string(), "0.1");
        assert_eq!(ParameterValue::Float(2.0).to_string(), "2");
        assert_eq!(ParameterValue::Int(-3).to_string(), "-3");
        assert_eq!(ParameterValue::Bool(true).to_string(), "true");
        assert_eq!(ParameterValue::Text("beta".into()).to_string(), "beta");
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(ParameterValue::Int(4).as_f64(), Some(4.0));
        assert_eq!(ParameterValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(ParameterValue::Bool(false).as_f64(), None);
        assert_eq!(ParameterValue::Text("x".into()).as_f64(), None);
    }

    #[test]
    fn test_untagged_serde() {
        let v: ParameterValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, ParameterValue::Int(3));
        let v: ParameterValue = serde_json::from_str("3.5").unwrap();
        assert_eq!(v, ParameterValue::Float(3.5));
        let v: ParameterValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ParameterValue::Bool(true));
        let v: ParameterValue = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(v, ParameterValue::Text("high".into()));
    }

    #[test]
    fn test_nan_detection() {
        assert!(ParameterValue::Float(f64::NAN).is_nan());
        assert!(!ParameterValue::Float(1.0).is_nan());
        assert!(!ParameterValue::Int(0).is_nan());
    }
}
