//! Numerical helpers shared by both engines.

use std::collections::HashMap;
use std::hash::Hash;

/// Tolerance for sum-to-one and probability-range checks.
pub const DELTA: f64 = 1e-8;

/// Whether `probability` lies in `[-delta, 1 + delta]`.
///
/// Must not be used for probability *densities*, which may exceed 1.
#[inline]
pub fn probability_in_range(probability: f64, delta: f64) -> bool {
    probability >= -delta && probability <= 1.0 + delta
}

/// Whether the values sum to 1 within `delta`.
#[inline]
pub fn sums_to_one<I>(values: I, delta: f64) -> bool
where
    I: IntoIterator<Item = f64>,
{
    let sum: f64 = values.into_iter().sum();
    (sum - 1.0).abs() <= delta
}

/// Exponentiates every value of a log-probability table.
///
/// Tables carry no iteration order of their own; the caller-supplied
/// candidate list remains the ordering authority for any derived output.
pub fn log_to_linear<K>(log_probabilities: &HashMap<K, f64>) -> HashMap<K, f64>
where
    K: Clone + Eq + Hash,
{
    log_probabilities
        .iter()
        .map(|(key, &log_probability)| (key.clone(), log_probability.exp()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{log_to_linear, probability_in_range, sums_to_one, DELTA};
    use std::collections::HashMap;

    #[test]
    fn range_check_admits_tolerance() {
        assert!(probability_in_range(0.0, DELTA));
        assert!(probability_in_range(1.0, DELTA));
        assert!(probability_in_range(-0.5e-8, DELTA));
        assert!(probability_in_range(1.0 + 0.5e-8, DELTA));
        assert!(!probability_in_range(-1e-7, DELTA));
        assert!(!probability_in_range(1.0 + 1e-7, DELTA));
    }

    #[test]
    fn sums_to_one_on_exact_and_near_distributions() {
        assert!(sums_to_one([0.25, 0.25, 0.5], DELTA));
        assert!(sums_to_one([0.5, 0.5 - 0.5e-8], DELTA));
        assert!(!sums_to_one([0.5, 0.4], DELTA));
    }

    #[test]
    fn log_to_linear_exponentiates_elementwise() {
        let mut logs = HashMap::new();
        logs.insert("a", (0.3f64).ln());
        logs.insert("b", f64::NEG_INFINITY);
        let linear = log_to_linear(&logs);
        assert!((linear["a"] - 0.3).abs() < 1e-12);
        assert_eq!(linear["b"], 0.0);
    }
}
