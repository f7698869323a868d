use serde::{Deserialize, Serialize};

use crate::types::{OverlapStatistics, RasterMeta};

// 1 / (2 pi), the legacy constant of the phase-to-time conversion.
const PHASE_TO_CYCLES: f64 = 0.159154;

/// Which valid fraction gates an overlap's weight. The legacy tool divides
/// the phase valid fraction by the coherence valid fraction before
/// thresholding; whether that normalization is intentional is unresolved,
/// so both behaviors are available and both fractions are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FractionGate {
    /// Gate on `phase_valid_fraction / coherence_valid_fraction`
    Normalized,
    /// Gate on the raw `phase_valid_fraction`
    Raw,
}

/// Spectral diversity aggregation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralDiversityParams {
    /// Minimum (gated) phase valid fraction for a nonzero weight
    pub fraction_threshold: f64,
    /// Maximum phase standard deviation for a nonzero weight
    pub phase_stdev_threshold: f64,
    /// Coherence threshold used by the overlap masking, reported alongside
    pub coherence_threshold: f64,
    pub fraction_gate: FractionGate,
}

impl Default for SpectralDiversityParams {
    fn default() -> Self {
        Self {
            fraction_threshold: 0.01,
            phase_stdev_threshold: 0.8,
            coherence_threshold: 0.8,
            fraction_gate: FractionGate::Normalized,
        }
    }
}

/// Aggregation result: the weighted double-difference phase and the weight
/// assigned to every overlap (order matches the input; gated-out entries
/// carry weight exactly 0, they are never dropped).
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    /// Weighted mean double-difference phase (rad), 0.0 when all gated out
    pub phase: f64,
    pub weights: Vec<f64>,
}

/// Quality-gated weighted average over all burst-overlap statistics of one
/// scene pair.
pub struct SpectralDiversityAggregator {
    params: SpectralDiversityParams,
}

impl SpectralDiversityAggregator {
    pub fn new(params: SpectralDiversityParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SpectralDiversityParams {
        &self.params
    }

    pub fn aggregate(&self, stats: &[OverlapStatistics]) -> AggregateOutcome {
        let weights: Vec<f64> = stats.iter().map(|s| self.weight(s)).collect();
        let weight_sum: f64 = weights.iter().sum();

        let phase = if weight_sum > 0.0 {
            stats
                .iter()
                .zip(weights.iter())
                .map(|(s, w)| s.phase_mean * w)
                .sum::<f64>()
                / weight_sum
        } else {
            0.0
        };

        log::info!(
            "Spectral diversity average over {} overlaps ({} weighted): {:.6} rad",
            stats.len(),
            weights.iter().filter(|&&w| w > 0.0).count(),
            phase
        );
        AggregateOutcome { phase, weights }
    }

    fn weight(&self, s: &OverlapStatistics) -> f64 {
        let gate_fraction = match self.params.fraction_gate {
            FractionGate::Normalized => s.normalized_phase_fraction(),
            FractionGate::Raw => s.phase_valid_fraction,
        };
        if s.phase_valid_fraction <= 0.0
            || gate_fraction <= self.params.fraction_threshold
            || s.phase_stdev >= self.params.phase_stdev_threshold
        {
            return 0.0;
        }
        s.phase_valid_fraction / (s.phase_stdev + 0.1) / (s.phase_valid_fraction + 0.1)
    }
}

/// Convert a double-difference phase into an azimuth pixel offset through
/// the fixed physical relation `dt = phase / (2 pi * f_dc_rate_diff)`,
/// `pixels = dt / azimuth_line_time`.
pub fn phase_to_pixel_offset(phase: f64, meta: &RasterMeta) -> f64 {
    if meta.doppler_centroid_rate_diff == 0.0 || meta.azimuth_line_time == 0.0 {
        return 0.0;
    }
    let dt = phase * PHASE_TO_CYCLES / meta.doppler_centroid_rate_diff;
    dt / meta.azimuth_line_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn good_stats(phase_mean: f64) -> OverlapStatistics {
        OverlapStatistics {
            phase_mean,
            phase_stdev: 0.1,
            phase_valid_fraction: 0.9,
            coherence_mean: 0.95,
            coherence_stdev: 0.02,
            coherence_valid_fraction: 0.95,
        }
    }

    #[test]
    fn weights_are_never_negative() {
        let aggregator = SpectralDiversityAggregator::new(SpectralDiversityParams::default());
        let stats = vec![
            good_stats(0.5),
            OverlapStatistics::degenerate(),
            good_stats(-0.2),
        ];
        let outcome = aggregator.aggregate(&stats);
        assert!(outcome.weights.iter().all(|&w| w >= 0.0));
        assert!(outcome.weights.iter().sum::<f64>() >= 0.0);
    }

    #[test]
    fn all_gated_out_yields_exact_zero() {
        let aggregator = SpectralDiversityAggregator::new(SpectralDiversityParams::default());
        let stats = vec![OverlapStatistics::degenerate(); 4];
        let outcome = aggregator.aggregate(&stats);
        assert_eq!(outcome.phase, 0.0);
        assert!(outcome.weights.iter().all(|&w| w == 0.0));
        assert_eq!(outcome.weights.len(), 4);
    }

    #[test]
    fn zero_valid_fraction_gets_zero_weight_regardless_of_stdev() {
        let mut stats = OverlapStatistics::degenerate();
        stats.phase_stdev = 0.0001; // excellent stdev, still no weight
        stats.coherence_valid_fraction = 0.9;
        let aggregator = SpectralDiversityAggregator::new(SpectralDiversityParams::default());
        assert_eq!(aggregator.aggregate(&[stats]).weights[0], 0.0);
    }

    #[test]
    fn high_stdev_entry_is_gated_but_reported() {
        let mut bad = good_stats(3.0);
        bad.phase_stdev = 2.0;
        let stats = vec![good_stats(0.4), bad];

        let aggregator = SpectralDiversityAggregator::new(SpectralDiversityParams::default());
        let outcome = aggregator.aggregate(&stats);
        assert_eq!(outcome.weights.len(), 2);
        assert_eq!(outcome.weights[1], 0.0);
        assert_abs_diff_eq!(outcome.phase, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn weighted_average_prefers_low_stdev_overlaps() {
        let mut noisy = good_stats(1.0);
        noisy.phase_stdev = 0.7;
        let stats = vec![good_stats(0.0), noisy];

        let aggregator = SpectralDiversityAggregator::new(SpectralDiversityParams::default());
        let outcome = aggregator.aggregate(&stats);
        assert!(outcome.phase < 0.5);
        assert!(outcome.weights[0] > outcome.weights[1]);
    }

    #[test]
    fn raw_and_normalized_gates_differ_near_threshold() {
        // raw fraction below threshold, normalized fraction above it
        let stats = OverlapStatistics {
            phase_mean: 0.2,
            phase_stdev: 0.1,
            phase_valid_fraction: 0.008,
            coherence_mean: 0.9,
            coherence_stdev: 0.01,
            coherence_valid_fraction: 0.4,
        };
        let mut params = SpectralDiversityParams::default();

        params.fraction_gate = FractionGate::Raw;
        let raw = SpectralDiversityAggregator::new(params.clone()).aggregate(&[stats]);
        assert_eq!(raw.weights[0], 0.0);

        params.fraction_gate = FractionGate::Normalized;
        let norm = SpectralDiversityAggregator::new(params).aggregate(&[stats]);
        assert!(norm.weights[0] > 0.0);
    }

    #[test]
    fn phase_converts_to_pixel_offset() {
        let meta = RasterMeta::with_dims(10, 10);
        // dc rate diff 4000 Hz/s, line time 2 ms
        let px = phase_to_pixel_offset(1.0, &meta);
        assert_abs_diff_eq!(px, 0.159154 / 4000.0 / 2.0e-3, epsilon = 1e-12);
        assert_eq!(phase_to_pixel_offset(0.0, &meta), 0.0);
    }
}
