use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::core::context::EngineContext;
use crate::types::{AreaOfInterest, OffsetField, OffsetSample};

/// Offset estimation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetEstimatorParams {
    /// Correlation window size in range samples
    pub window_range: usize,
    /// Correlation window size in azimuth lines
    pub window_azimuth: usize,
    /// Window grid step in range samples
    pub step_range: usize,
    /// Window grid step in azimuth lines
    pub step_azimuth: usize,
    /// Correlation surface oversampling factor
    pub oversample: usize,
    /// Minimum correlation SNR for a window to be accepted
    pub snr_threshold: f64,
}

impl Default for OffsetEstimatorParams {
    fn default() -> Self {
        Self {
            window_range: 64,
            window_azimuth: 64,
            step_range: 32,
            step_azimuth: 32,
            oversample: 2,
            snr_threshold: 7.0,
        }
    }
}

/// Windowed intensity cross-correlation between the reference and the
/// resampled secondary, producing a sparse offset field.
///
/// Pure: a function of its inputs only. Windows whose correlation peak is
/// ambiguous or below the SNR threshold are omitted, not zero-filled, so an
/// empty field is a meaningful signal the caller must handle.
pub struct OffsetEstimator {
    params: OffsetEstimatorParams,
}

impl OffsetEstimator {
    pub fn new(params: OffsetEstimatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &OffsetEstimatorParams {
        &self.params
    }

    /// Estimate per-window offsets of `secondary` relative to `reference`
    /// inside the inclusive `aoi` bounds. Samples are ordered by window
    /// position regardless of how the windows were scheduled.
    pub fn estimate(
        &self,
        ctx: &EngineContext,
        reference: ArrayView2<f32>,
        secondary: ArrayView2<f32>,
        aoi: &AreaOfInterest,
    ) -> OffsetField {
        let origins = self.window_origins(reference.dim(), secondary.dim(), aoi);
        log::debug!(
            "Correlating {} windows of {}x{} (step {}x{})",
            origins.len(),
            self.params.window_azimuth,
            self.params.window_range,
            self.params.step_azimuth,
            self.params.step_range
        );

        let correlate_one = |&(az0, rg0): &(usize, usize)| -> Option<OffsetSample> {
            let az1 = az0 + self.params.window_azimuth;
            let rg1 = rg0 + self.params.window_range;
            let ref_win = reference.slice(s![az0..az1, rg0..rg1]);
            let sec_win = secondary.slice(s![az0..az1, rg0..rg1]);
            let peak = ctx
                .kernel
                .correlate(ref_win, sec_win, self.params.oversample)?;
            if peak.snr < self.params.snr_threshold {
                return None;
            }
            Some(OffsetSample {
                window_row: az0 + self.params.window_azimuth / 2,
                window_col: rg0 + self.params.window_range / 2,
                delta_range: peak.delta_range,
                delta_azimuth: peak.delta_azimuth,
                snr: peak.snr,
            })
        };

        #[cfg(feature = "parallel")]
        let mut samples: Vec<OffsetSample> = {
            use rayon::prelude::*;
            origins.par_iter().filter_map(correlate_one).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let mut samples: Vec<OffsetSample> = origins.iter().filter_map(correlate_one).collect();

        samples.sort_by_key(|smp| (smp.window_row, smp.window_col));

        log::info!(
            "Offset estimation accepted {}/{} windows",
            samples.len(),
            origins.len()
        );
        OffsetField { samples }
    }

    /// Top-left corners of all windows fully contained in both rasters and
    /// the area of interest.
    fn window_origins(
        &self,
        ref_dim: (usize, usize),
        sec_dim: (usize, usize),
        aoi: &AreaOfInterest,
    ) -> Vec<(usize, usize)> {
        let rows = ref_dim.0.min(sec_dim.0);
        let cols = ref_dim.1.min(sec_dim.1);
        let az_stop = aoi.azimuth_stop.min(rows.saturating_sub(1));
        let rg_stop = aoi.range_stop.min(cols.saturating_sub(1));

        let mut origins = Vec::new();
        if self.params.window_azimuth == 0 || self.params.window_range == 0 {
            return origins;
        }
        let step_az = self.params.step_azimuth.max(1);
        let step_rg = self.params.step_range.max(1);

        let mut az = aoi.azimuth_start;
        while az + self.params.window_azimuth <= az_stop + 1 {
            let mut rg = aoi.range_start;
            while rg + self.params.window_range <= rg_stop + 1 {
                origins.push((az, rg));
                rg += step_rg;
            }
            az += step_az;
        }
        origins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::BuiltinKernel;
    use crate::types::RasterMeta;
    use ndarray::Array2;

    fn noise_field(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
        let mut state = seed.max(1);
        Array2::from_shape_fn((rows, cols), |_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 10_000) as f32 / 10_000.0
        })
    }

    fn small_params() -> OffsetEstimatorParams {
        OffsetEstimatorParams {
            window_range: 32,
            window_azimuth: 32,
            step_range: 16,
            step_azimuth: 16,
            oversample: 2,
            snr_threshold: 5.0,
        }
    }

    #[test]
    fn identical_rasters_give_zero_offsets() {
        let field = noise_field(96, 96, 19);
        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);
        let aoi = AreaOfInterest::full(&RasterMeta::with_dims(96, 96));

        let estimator = OffsetEstimator::new(small_params());
        let offsets = estimator.estimate(&ctx, field.view(), field.view(), &aoi);

        assert!(!offsets.is_empty());
        for smp in &offsets.samples {
            assert!(smp.delta_range.abs() < 1e-6);
            assert!(smp.delta_azimuth.abs() < 1e-6);
            assert!(smp.snr >= 5.0);
        }
    }

    #[test]
    fn flat_rasters_give_empty_field() {
        let flat = Array2::from_elem((96, 96), 0.5f32);
        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);
        let aoi = AreaOfInterest::full(&RasterMeta::with_dims(96, 96));

        let estimator = OffsetEstimator::new(small_params());
        let offsets = estimator.estimate(&ctx, flat.view(), flat.view(), &aoi);
        assert!(offsets.is_empty());
    }

    #[test]
    fn aoi_restricts_window_placement() {
        let estimator = OffsetEstimator::new(small_params());
        let aoi = AreaOfInterest {
            range_start: 0,
            range_stop: 31,
            azimuth_start: 0,
            azimuth_stop: 31,
        };
        let origins = estimator.window_origins((96, 96), (96, 96), &aoi);
        assert_eq!(origins, vec![(0, 0)]);
    }

    #[test]
    fn samples_are_ordered_by_window_position() {
        let field = noise_field(96, 96, 5);
        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);
        let aoi = AreaOfInterest::full(&RasterMeta::with_dims(96, 96));

        let estimator = OffsetEstimator::new(small_params());
        let offsets = estimator.estimate(&ctx, field.view(), field.view(), &aoi);
        for pair in offsets.samples.windows(2) {
            assert!((pair[0].window_row, pair[0].window_col) < (pair[1].window_row, pair[1].window_col));
        }
    }
}
