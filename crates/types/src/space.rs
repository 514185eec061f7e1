//! Parameter space definition, validation, and encoding
//!
//! A `ParameterSpace` maps unique names to typed specs and provides the
//! canonical bridge into optimizer-native dense real vectors. Dimension order
//! is always lexicographic over parameter names, so every component that
//! encodes or decodes agrees on the layout without further coordination.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::value::ParameterValue;

pub type Result<T> = std::result::Result<T, SpaceError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    #[error("Invalid parameter spec for '{name}': {reason}")]
    InvalidSpec { name: String, reason: String },

    #[error("Duplicate parameter name: {0}")]
    DuplicateParameter(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Encoded vector has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// The admissible domain of one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterSpec {
    /// Closed real interval `[min, max]`, `min < max`
    Continuous { min: f64, max: f64 },
    /// Closed integer interval `[min, max]`, `min < max`
    Integer { min: i64, max: i64 },
    /// Non-empty ordered set of admissible values
    Categorical { values: Vec<ParameterValue> },
}

impl ParameterSpec {
    /// Validate the internal consistency of the spec itself
    pub fn check(&self, name: &str) -> Result<()> {
        match self {
            Self::Continuous { min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(SpaceError::InvalidSpec {
                        name: name.to_string(),
                        reason: "bounds must be finite".to_string(),
                    });
                }
                if min >= max {
                    return Err(SpaceError::InvalidSpec {
                        name: name.to_string(),
                        reason: format!("empty interval [{}, {}]", min, max),
                    });
                }
            }
            Self::Integer { min, max } => {
                // A single-integer interval is admissible as a constant axis.
                if min > max {
                    return Err(SpaceError::InvalidSpec {
                        name: name.to_string(),
                        reason: format!("empty interval [{}, {}]", min, max),
                    });
                }
            }
            Self::Categorical { values } => {
                if values.is_empty() {
                    return Err(SpaceError::InvalidSpec {
                        name: name.to_string(),
                        reason: "categorical values must be non-empty".to_string(),
                    });
                }
                if values.iter().any(|v| v.is_nan()) {
                    return Err(SpaceError::InvalidSpec {
                        name: name.to_string(),
                        reason: "NaN is not an admissible categorical value".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Check a concrete value against this spec
    pub fn admits(&self, value: &ParameterValue) -> std::result::Result<(), String> {
        match self {
            Self::Continuous { min, max } => match value {
                ParameterValue::Float(f) if f.is_nan() => Err("value is NaN".to_string()),
                ParameterValue::Float(f) if *f >= *min && *f <= *max => Ok(()),
                ParameterValue::Int(i) if (*i as f64) >= *min && (*i as f64) <= *max => Ok(()),
                ParameterValue::Float(f) => {
                    Err(format!("value {} outside [{}, {}]", f, min, max))
                }
                other => Err(format!(
                    "expected a number, got {} value",
                    other.type_name()
                )),
            },
            Self::Integer { min, max } => match value {
                ParameterValue::Int(i) if i >= min && i <= max => Ok(()),
                ParameterValue::Int(i) => Err(format!("value {} outside [{}, {}]", i, min, max)),
                other => Err(format!(
                    "expected an integer, got {} value",
                    other.type_name()
                )),
            },
            Self::Categorical { values } => {
                if values.contains(value) {
                    Ok(())
                } else {
                    Err(format!("value {} not in the categorical set", value))
                }
            }
        }
    }

    /// Lower bound of the encoded dimension
    pub fn encoded_lower(&self) -> f64 {
        match self {
            Self::Continuous { min, .. } => *min,
            Self::Integer { min, .. } => *min as f64,
            Self::Categorical { .. } => 0.0,
        }
    }

    /// Upper bound of the encoded dimension
    pub fn encoded_upper(&self) -> f64 {
        match self {
            Self::Continuous { max, .. } => *max,
            Self::Integer { max, .. } => *max as f64,
            Self::Categorical { values } => (values.len() - 1) as f64,
        }
    }
}

/// A named parameter: its domain plus an optional human description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    #[serde(flatten)]
    pub spec: ParameterSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterDef {
    pub fn new(spec: ParameterSpec) -> Self {
        Self {
            spec,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<ParameterSpec> for ParameterDef {
    fn from(spec: ParameterSpec) -> Self {
        Self::new(spec)
    }
}

/// One problem raised by `ParameterSpace::validate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Parameter the issue refers to
    pub name: String,
    /// Human-readable description
    pub message: String,
}

/// A concrete assignment of values to parameter names
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector(pub BTreeMap<String, ParameterValue>);

impl ParameterVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ParameterValue)> for ParameterVector {
    fn from_iter<T: IntoIterator<Item = (String, ParameterValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The search space of an experiment
///
/// Immutable after construction. Iteration order is lexicographic over names,
/// which is also the canonical encode/decode dimension order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace {
    params: BTreeMap<String, ParameterDef>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self {
            params: BTreeMap::new(),
        }
    }

    /// Register a parameter; rejects duplicates and malformed specs
    pub fn insert(&mut self, name: impl Into<String>, def: impl Into<ParameterDef>) -> Result<()> {
        let name = name.into();
        let def = def.into();
        def.spec.check(&name)?;
        if self.params.contains_key(&name) {
            return Err(SpaceError::DuplicateParameter(name));
        }
        self.params.insert(name, def);
        Ok(())
    }

    /// Builder-style insert
    pub fn with_param(
        mut self,
        name: impl Into<String>,
        def: impl Into<ParameterDef>,
    ) -> Result<Self> {
        self.insert(name, def)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.params.get(name)
    }

    /// Parameters in canonical (lexicographic) order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterDef)> {
        self.params.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.params.keys()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Number of encoded dimensions (one per parameter)
    pub fn dimension(&self) -> usize {
        self.params.len()
    }

    /// Check a vector: every name present, types match, values in-domain
    pub fn validate(&self, vec: &ParameterVector) -> std::result::Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        for (name, def) in &self.params {
            match vec.get(name) {
                None => issues.push(ValidationIssue {
                    name: name.clone(),
                    message: "missing parameter".to_string(),
                }),
                Some(value) => {
                    if let Err(message) = def.spec.admits(value) {
                        issues.push(ValidationIssue {
                            name: name.clone(),
                            message,
                        });
                    }
                }
            }
        }

        for name in vec.0.keys() {
            if !self.params.contains_key(name) {
                issues.push(ValidationIssue {
                    name: name.clone(),
                    message: "not declared in the parameter space".to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Flatten a vector into dense reals in canonical order
    ///
    /// Categorical values encode as the index into their ordered list,
    /// integers pass through as reals.
    pub fn encode(&self, vec: &ParameterVector) -> Result<Vec<f64>> {
        let mut encoded = Vec::with_capacity(self.params.len());

        for (name, def) in &self.params {
            let value = vec
                .get(name)
                .ok_or_else(|| SpaceError::UnknownParameter(name.clone()))?;
            let real = match &def.spec {
                ParameterSpec::Continuous { .. } | ParameterSpec::Integer { .. } => value
                    .as_f64()
                    .ok_or_else(|| SpaceError::InvalidSpec {
                        name: name.clone(),
                        reason: format!("cannot encode {} value as real", value.type_name()),
                    })?,
                ParameterSpec::Categorical { values } => values
                    .iter()
                    .position(|v| v == value)
                    .ok_or_else(|| SpaceError::InvalidSpec {
                        name: name.clone(),
                        reason: format!("value {} not in the categorical set", value),
                    })? as f64,
            };
            encoded.push(real);
        }

        Ok(encoded)
    }

    /// Inverse of `encode`
    ///
    /// Continuous values are clamped to their interval. Integers round
    /// nearest with ties to even, then clamp. Categorical indices truncate
    /// toward zero and clamp to `[0, len - 1]`.
    pub fn decode(&self, encoded: &[f64]) -> Result<ParameterVector> {
        if encoded.len() != self.params.len() {
            return Err(SpaceError::DimensionMismatch {
                expected: self.params.len(),
                actual: encoded.len(),
            });
        }

        let mut vec = ParameterVector::new();
        for ((name, def), &x) in self.params.iter().zip(encoded.iter()) {
            let value = match &def.spec {
                ParameterSpec::Continuous { min, max } => {
                    ParameterValue::Float(x.clamp(*min, *max))
                }
                ParameterSpec::Integer { min, max } => {
                    ParameterValue::Int((x.round_ties_even() as i64).clamp(*min, *max))
                }
                ParameterSpec::Categorical { values } => {
                    let idx = (x.trunc() as i64).clamp(0, (values.len() - 1) as i64) as usize;
                    values[idx].clone()
                }
            };
            vec.insert(name.clone(), value);
        }

        Ok(vec)
    }

    /// Lower encoded bounds in canonical order
    pub fn bounds_lower(&self) -> Vec<f64> {
        self.params.values().map(|d| d.spec.encoded_lower()).collect()
    }

    /// Upper encoded bounds in canonical order
    pub fn bounds_upper(&self) -> Vec<f64> {
        self.params.values().map(|d| d.spec.encoded_upper()).collect()
    }

    /// Draw one vector uniformly per dimension
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterVector {
        let mut vec = ParameterVector::new();
        for (name, def) in &self.params {
            let value = match &def.spec {
                ParameterSpec::Continuous { min, max } => {
                    ParameterValue::Float(rng.gen_range(*min..=*max))
                }
                ParameterSpec::Integer { min, max } => {
                    ParameterValue::Int(rng.gen_range(*min..=*max))
                }
                ParameterSpec::Categorical { values } => {
                    values[rng.gen_range(0..values.len())].clone()
                }
            };
            vec.insert(name.clone(), value);
        }
        vec
    }
}
