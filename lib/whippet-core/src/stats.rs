//! Deterministic numeric reductions over sample sequences.
//!
//! Conventions here are fixed so that published aggregation expectations stay stable:
//!
//! - Standard deviation uses the population form (divide by `n`, not `n - 1`).
//! - Quantiles over a sorted sequence of length `n` follow the convention of the `simple-statistics` library:
//!   `q = 0` yields the minimum and `q = 1` the maximum; otherwise, with `idx = n * q`, an integral `idx` yields the
//!   mean of `sorted[idx - 1]` and `sorted[idx]`, while a fractional `idx` yields `sorted[floor(idx)]`.
//! - The median is the 0.5 quantile.
//!
//! All functions expect a non-empty input; callers are responsible for skipping empty sample sets.

/// Sums the given values.
pub fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

/// Computes the arithmetic mean of the given values.
pub fn mean(values: &[f64]) -> f64 {
    debug_assert!(!values.is_empty());

    sum(values) / values.len() as f64
}

/// Returns the smallest of the given values.
pub fn min(values: &[f64]) -> f64 {
    debug_assert!(!values.is_empty());

    values.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Returns the largest of the given values.
pub fn max(values: &[f64]) -> f64 {
    debug_assert!(!values.is_empty());

    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Computes the median of the given values.
pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

/// Computes the population standard deviation of the given values.
pub fn std_dev(values: &[f64]) -> f64 {
    debug_assert!(!values.is_empty());

    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Computes a single quantile of the given values.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    quantile_sorted(&sorted, q)
}

/// Computes a set of quantiles of the given values, sorting only once.
///
/// The quantile list may be empty or contain duplicates; one output is produced per requested quantile, in request
/// order.
pub fn quantiles(values: &[f64], qs: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    qs.iter().map(|q| quantile_sorted(&sorted, *q)).collect()
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());

    if q <= 0.0 {
        return sorted[0];
    }
    if q >= 1.0 {
        return sorted[sorted.len() - 1];
    }

    let idx = sorted.len() as f64 * q;
    if idx.fract() == 0.0 {
        // Integral index: the quantile falls exactly between two elements.
        let idx = idx as usize;
        (sorted[idx - 1] + sorted[idx]) / 2.0
    } else {
        sorted[idx.floor() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_and_mean() {
        assert_eq!(sum(&[2.0, 3.0]), 5.0);
        assert_eq!(mean(&[2.0, 4.0]), 3.0);
    }

    #[test]
    fn min_and_max() {
        let values = [2.0, 5.0, 3.0];
        assert_eq!(min(&values), 2.0);
        assert_eq!(max(&values), 5.0);
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[2.0, 5.0, 3.0]), 3.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn std_dev_is_population_form() {
        // Population variance of [1, 2, 3] is 2/3.
        let expected = (2.0f64 / 3.0).sqrt();
        assert!((std_dev(&[1.0, 2.0, 3.0]) - expected).abs() < 1e-9);
    }

    #[test]
    fn quantiles_over_integer_range() {
        let values: Vec<f64> = (0..=100).map(|v| v as f64).collect();

        let results = quantiles(&values, &[0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(results, vec![0.0, 25.0, 50.0, 75.0, 100.0]);
    }

    #[test]
    fn quantile_boundaries_and_duplicates() {
        let values = [5.0];
        assert_eq!(quantiles(&values, &[0.0, 0.5, 0.5, 1.0]), vec![5.0, 5.0, 5.0, 5.0]);
        assert!(quantiles(&values, &[]).is_empty());
    }

    #[test]
    fn quantile_unsorted_input() {
        let values = [9.0, 1.0, 5.0];
        assert_eq!(quantile(&values, 0.5), 5.0);
    }
}
