//! Per-size throughput statistics.

/// Weight of the newest sample in the moving averages.
pub const EWMA_ALPHA: f64 = 0.3;

/// Spread assumed for a distribution, as a fraction of its mean, when the
/// observed spread is smaller. Keeps a handful of identical samples from
/// claiming perfect certainty.
const MIN_RELATIVE_SIGMA: f64 = 0.05;

const OUTLIER_Z: f64 = 3.0;
const OUTLIER_RELATIVE_STDDEV: f64 = 0.5;
const OUTLIER_RELATIVE_JUMP: f64 = 0.5;

/// Exponentially weighted mean and variance of throughput at one pool size.
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputDistribution {
    mean: f64,
    variance: f64,
    samples: u64,
    updated_tick: u64,
}

impl ThroughputDistribution {
    pub fn new(sample: f64, tick: u64) -> Self {
        Self {
            mean: sample,
            variance: 0.0,
            samples: 1,
            updated_tick: tick,
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stddev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn updated_tick(&self) -> u64 {
        self.updated_tick
    }

    pub fn record(&mut self, sample: f64, tick: u64) {
        let diff = sample - self.mean;
        let increment = EWMA_ALPHA * diff;
        self.mean += increment;
        self.variance = (1.0 - EWMA_ALPHA) * (self.variance + diff * increment);
        self.samples += 1;
        self.updated_tick = tick;
    }

    fn sigma(&self) -> f64 {
        self.stddev()
            .max(self.mean.abs() * MIN_RELATIVE_SIGMA)
            .max(f64::EPSILON)
    }

    /// Whether `sample` is too far from this distribution to belong to it.
    pub fn is_outlier(&self, sample: f64) -> bool {
        let z = (sample - self.mean) / self.sigma();
        if z.abs() > OUTLIER_Z {
            return true;
        }
        if self.mean.abs() <= f64::EPSILON {
            return false;
        }
        self.stddev() / self.mean.abs() > OUTLIER_RELATIVE_STDDEV
            || (sample - self.mean).abs() / self.mean.abs() > OUTLIER_RELATIVE_JUMP
    }

    /// Probability that a draw from this distribution exceeds `forecast`,
    /// treating it as normal.
    pub fn prob_exceeds(&self, forecast: f64) -> f64 {
        let z = (forecast - self.mean) / self.sigma();
        0.5 * erfc(z / std::f64::consts::SQRT_2)
    }
}

/// Complementary error function, Abramowitz & Stegun 7.1.26
/// (absolute error below 1.5e-7).
fn erfc(x: f64) -> f64 {
    const P: f64 = 0.327_591_1;
    const A: [f64; 5] = [
        0.254_829_592,
        -0.284_496_736,
        1.421_413_741,
        -1.453_152_027,
        1.061_405_429,
    ];
    let t = 1.0 / (1.0 + P * x.abs());
    let poly = A.iter().rev().fold(0.0, |acc, a| acc * t + a) * t;
    let erfc_abs = poly * (-x * x).exp();
    if x >= 0.0 {
        erfc_abs
    } else {
        2.0 - erfc_abs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erfc_reference_points() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-6);
        assert!((erfc(1.0) - 0.157_299_2).abs() < 1e-6);
        assert!((erfc(-1.0) - 1.842_700_8).abs() < 1e-6);
    }

    #[test]
    fn test_ewma_moves_towards_samples() {
        let mut dist = ThroughputDistribution::new(100.0, 0);
        dist.record(110.0, 1);
        assert!((dist.mean() - 103.0).abs() < 1e-9);
        assert!(dist.stddev() > 0.0);
        assert_eq!(dist.samples(), 2);
        assert_eq!(dist.updated_tick(), 1);
    }

    #[test]
    fn test_probability_of_exceeding() {
        let dist = ThroughputDistribution::new(80.0, 0);
        assert!((dist.prob_exceeds(80.0) - 0.5).abs() < 1e-6);
        assert!(dist.prob_exceeds(100.0) < 0.01);
        assert!(dist.prob_exceeds(60.0) > 0.99);
    }

    #[test]
    fn test_outliers() {
        let dist = ThroughputDistribution::new(100.0, 0);
        assert!(!dist.is_outlier(105.0));
        assert!(dist.is_outlier(200.0));
        assert!(dist.is_outlier(10.0));
    }
}
