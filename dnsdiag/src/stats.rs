//! Latency statistics over a sample of round-trip times.

/// Aggregate figures over a run, in floating-point milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub stddev: f64,
}

/// Summarize a sample vector. The empty vector yields all zeroes; the
/// standard deviation is the sample deviation and is zero for fewer than
/// two samples.
pub fn summarize(samples: &[f64]) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats::default();
    }

    let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let avg = samples.iter().sum::<f64>() / samples.len() as f64;

    let stddev = if samples.len() > 1 {
        let var = samples.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };

    LatencyStats {
        min,
        max,
        avg,
        stddev,
    }
}

/// Loss percentage over a run. `sent` of zero never happens for a finished
/// run (count is validated to be at least 1) but is mapped to zero loss to
/// keep the function total.
pub fn loss_percent(sent: u32, received: u32) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    (100 * (sent - received)) as f64 / sent as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_is_all_zero() {
        let stats = summarize(&[]);
        assert_eq!(stats, LatencyStats::default());
    }

    #[test]
    fn single_sample_has_zero_stddev() {
        let stats = summarize(&[42.5]);
        assert_eq!(stats.min, 42.5);
        assert_eq!(stats.max, 42.5);
        assert_eq!(stats.avg, 42.5);
        assert_eq!(stats.stddev, 0.0);
    }

    #[test]
    fn ordering_invariant() {
        let stats = summarize(&[10.0, 20.0, 30.0, 25.0]);
        assert!(stats.min <= stats.avg && stats.avg <= stats.max);
        assert!(stats.stddev >= 0.0);
    }

    #[test]
    fn sample_stddev() {
        // sample (n-1) deviation of [2, 4, 4, 4, 5, 5, 7, 9] is ~2.138
        let stats = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((stats.stddev - 2.1380899).abs() < 1e-6);
        assert_eq!(stats.avg, 5.0);
    }

    #[test]
    fn loss_percentages() {
        assert_eq!(loss_percent(10, 10), 0.0);
        assert_eq!(loss_percent(10, 0), 100.0);
        assert_eq!(loss_percent(4, 3), 25.0);
        assert_eq!(loss_percent(0, 0), 0.0);
    }
}
