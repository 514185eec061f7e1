//! Deterministic retry jitter
//!
//! Retry policies perturb numeric parameters slightly before re-dispatching,
//! so a simulation that failed on a pathological point gets a nearby one.
//! The perturbation is seeded by the attempt number and is therefore
//! reproducible across reruns.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sim_optimizer_types::{ParameterValue, ParameterVector};

/// Multiplicative noise bound: up to plus or minus one percent
const JITTER_SPAN: f64 = 0.02;

/// Perturb numeric values by up to one percent, seeded by `attempt`
///
/// Attempt 0 is the identity. Categorical and boolean values pass through
/// untouched. Iteration order over the vector is deterministic, so the same
/// attempt always produces the same perturbation.
pub fn jitter(params: &ParameterVector, attempt: u32) -> ParameterVector {
    if attempt == 0 {
        return params.clone();
    }

    let mut rng = StdRng::seed_from_u64(attempt as u64);
    params
        .iter()
        .map(|(name, value)| {
            let jittered = match value {
                ParameterValue::Float(f) => {
                    let factor = 1.0 + (rng.gen::<f64>() - 0.5) * JITTER_SPAN;
                    ParameterValue::Float(f * factor)
                }
                ParameterValue::Int(i) => {
                    let factor = 1.0 + (rng.gen::<f64>() - 0.5) * JITTER_SPAN;
                    ParameterValue::Int((*i as f64 * factor).round() as i64)
                }
                other => other.clone(),
            };
            (name.clone(), jittered)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_vector() -> ParameterVector {
        ParameterVector::new()
            .with("beta", 0.4)
            .with("population", 1000i64)
            .with("policy", "strict")
            .with("verbose", true)
    }

    #[test]
    fn test_attempt_zero_is_identity() {
        let params = demo_vector();
        assert_eq!(jitter(&params, 0), params);
    }

    #[test]
    fn test_deterministic_per_attempt() {
        let params = demo_vector();
        assert_eq!(jitter(&params, 2), jitter(&params, 2));
        assert_ne!(jitter(&params, 2), jitter(&params, 3));
    }

    #[test]
    fn test_noise_within_one_percent() {
        let params = demo_vector();
        for attempt in 1..50 {
            let jittered = jitter(&params, attempt);
            let beta = jittered.get("beta").unwrap().as_f64().unwrap();
            assert!((beta - 0.4).abs() <= 0.4 * 0.01 + 1e-12);

            let population = match jittered.get("population").unwrap() {
                ParameterValue::Int(i) => *i,
                other => panic!("integer became {:?}", other),
            };
            assert!((population - 1000).abs() <= 11);
        }
    }

    #[test]
    fn test_non_numeric_untouched() {
        let params = demo_vector();
        let jittered = jitter(&params, 5);
        assert_eq!(
            jittered.get("policy"),
            Some(&ParameterValue::Text("strict".into()))
        );
        assert_eq!(jittered.get("verbose"), Some(&ParameterValue::Bool(true)));
    }
}
