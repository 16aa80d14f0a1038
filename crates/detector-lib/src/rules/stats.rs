//! Small numeric helpers shared by the rule evaluators

use crate::models::MetricSample;

pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values.iter().copied());
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Least-squares line through `(x, y)` points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Span of x covered by the points
    pub span: f64,
}

impl LinearFit {
    /// Fit y against seconds since the first point
    pub fn from_points(points: &[(i64, f64)]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }

        // Normalize timestamps to avoid precision issues
        let t0 = points[0].0 as f64;
        let n = points.len() as f64;

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_xx = 0.0;
        for (ts, y) in points {
            let x = *ts as f64 - t0;
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_xx += x * x;
        }

        let denominator = n * sum_xx - sum_x * sum_x;
        if denominator.abs() < f64::EPSILON {
            return None;
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let intercept = (sum_y - slope * sum_x) / n;
        let span = points[points.len() - 1].0 as f64 - t0;
        Some(Self {
            slope,
            intercept,
            span,
        })
    }

    pub fn start(&self) -> f64 {
        self.intercept
    }

    pub fn end(&self) -> f64 {
        self.intercept + self.slope * self.span
    }

    /// Change across the span relative to the fitted start
    pub fn relative_change(&self) -> Option<f64> {
        let start = self.start();
        if start <= 0.0 {
            return None;
        }
        Some((self.end() - start) / start)
    }
}

/// Fitted relative change of memory usage over the samples
pub fn memory_trend(samples: &[MetricSample]) -> Option<f64> {
    let points: Vec<(i64, f64)> = samples
        .iter()
        .map(|s| (s.timestamp, s.memory_used_bytes as f64))
        .collect();
    LinearFit::from_points(&points)?.relative_change()
}

/// Mean network throughput in bytes per second
pub fn network_rate(samples: &[MetricSample], sample_interval_secs: u64) -> f64 {
    if samples.is_empty() || sample_interval_secs == 0 {
        return 0.0;
    }
    let total: u64 = samples.iter().map(|s| s.network_bytes).sum();
    total as f64 / (samples.len() as f64 * sample_interval_secs as f64)
}

pub fn mean_cpu(samples: &[MetricSample]) -> f64 {
    mean(samples.iter().map(|s| s.cpu_fraction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std_dev() {
        assert_eq!(mean(Vec::new()), 0.0);
        assert!((mean(vec![1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_linear_fit_recovers_line() {
        let points: Vec<(i64, f64)> = (0..10).map(|i| (1000 + i * 10, 50.0 + 2.0 * i as f64)).collect();
        let fit = LinearFit::from_points(&points).unwrap();

        assert!((fit.slope - 0.2).abs() < 1e-9);
        assert!((fit.start() - 50.0).abs() < 1e-9);
        assert!((fit.end() - 68.0).abs() < 1e-9);
        assert!((fit.relative_change().unwrap() - 0.36).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_fit() {
        assert!(LinearFit::from_points(&[(5, 1.0)]).is_none());
        assert!(LinearFit::from_points(&[(5, 1.0), (5, 2.0)]).is_none());
    }
}
