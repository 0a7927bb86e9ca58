//! Rolling statistics used by the feature set
//!
//! Every helper returns one slot per input; `None` marks positions without
//! enough trailing history.

/// Trailing mean over `window` values
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    let mut result = vec![None; values.len()];
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            result[i] = Some(sum / window as f64);
        }
    }
    result
}

/// Trailing population standard deviation (ddof = 0) over `window` values
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            // Flat window: report exactly zero rather than rounding noise
            if slice.iter().all(|v| *v == slice[0]) {
                return Some(0.0);
            }
            let mean = slice.iter().sum::<f64>() / window as f64;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window as f64;
            Some(var.sqrt())
        })
        .collect()
}

/// `values[t] - values[t - lag]`
pub fn diff(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| (i >= lag).then(|| values[i] - values[i - lag]))
        .collect()
}

/// Non-adjusted recursive EMA: `ema[t] = a * x[t] + (1 - a) * ema[t-1]`,
/// `a = 2 / (span + 1)`, seeded with the first available value.
/// Gaps after the seed carry the previous average forward.
pub fn ema(values: &[Option<f64>], span: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut prev: Option<f64> = None;

    values
        .iter()
        .map(|value| {
            prev = match (prev, value) {
                (None, Some(x)) => Some(*x),
                (Some(p), Some(x)) => Some(alpha * x + (1.0 - alpha) * p),
                (p, None) => p,
            };
            prev
        })
        .collect()
}

/// `(x - mean) / std`, coerced to 0 when the deviation is zero or undefined
pub fn z_score(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    if z.is_finite() {
        z
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_rolling_mean() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(approx(out[2].unwrap(), 2.0));
        assert!(approx(out[3].unwrap(), 3.0));
        assert!(approx(out[4].unwrap(), 4.0));
    }

    #[test]
    fn test_rolling_std_is_population() {
        // Population std of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let out = rolling_std(&values, 8);
        assert!(out[..7].iter().all(|v| v.is_none()));
        assert!(approx(out[7].unwrap(), 2.0));
    }

    #[test]
    fn test_flat_window_has_zero_std() {
        let out = rolling_std(&[100.1; 20], 20);
        assert_eq!(out[19], Some(0.0));
    }

    #[test]
    fn test_short_input_all_undefined() {
        assert!(rolling_mean(&[1.0, 2.0], 5).iter().all(|v| v.is_none()));
        assert!(rolling_std(&[1.0, 2.0], 5).iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_diff() {
        let out = diff(&[1.0, 4.0, 9.0, 16.0], 3);
        assert_eq!(out, vec![None, None, None, Some(15.0)]);
        let out = diff(&[1.0, 4.0, 9.0], 1);
        assert_eq!(out, vec![None, Some(3.0), Some(5.0)]);
    }

    #[test]
    fn test_ema_recursive_form() {
        // span 3 -> alpha 0.5
        let out = ema(&[None, Some(2.0), Some(4.0), Some(0.0)], 3);
        assert_eq!(out[0], None);
        assert!(approx(out[1].unwrap(), 2.0));
        assert!(approx(out[2].unwrap(), 3.0));
        assert!(approx(out[3].unwrap(), 1.5));
    }

    #[test]
    fn test_z_score_coercion() {
        assert_eq!(z_score(5.0, 5.0, 0.0), 0.0);
        assert_eq!(z_score(6.0, 5.0, 0.0), 0.0);
        assert_eq!(z_score(6.0, 5.0, f64::NAN), 0.0);
        assert!(approx(z_score(7.0, 5.0, 2.0), 1.0));
    }
}
