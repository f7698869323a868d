use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::core::azimuth::{AzimuthConvergenceLoop, AzimuthLoopParams};
use crate::core::context::EngineContext;
use crate::core::intensity::{
    estimation_intensity, IntensityConvergenceLoop, IntensityLoopParams,
};
use crate::core::offset::OffsetEstimator;
use crate::types::{
    AreaOfInterest, CoregError, CoregResult, CpxSample, LookupTable, QualityReport, RealImage,
    SlcImage, SlcRaster,
};

/// Full engine configuration; every threshold named by the refinement
/// stages is reachable here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoregConfig {
    pub intensity: IntensityLoopParams,
    pub azimuth: AzimuthLoopParams,
    /// Tolerance band of the zero-offset sanity check. The legacy tool
    /// compared the sum against 0.0 exactly; its intended tolerance is
    /// undocumented, so the band is explicit and configurable here.
    pub zero_offset_tolerance: f64,
}

impl Default for CoregConfig {
    fn default() -> Self {
        Self {
            intensity: IntensityLoopParams::default(),
            azimuth: AzimuthLoopParams::default(),
            zero_offset_tolerance: 1e-9,
        }
    }
}

/// Everything one engine run produces.
#[derive(Debug)]
pub struct CoregOutput {
    pub lut: LookupTable,
    pub report: QualityReport,
    /// Secondary resampled with the final lookup table, full resolution
    pub resampled_secondary: SlcImage,
    /// Differential interferogram of reference and resampled secondary
    pub differential_interferogram: SlcImage,
}

/// Top-level driver: intensity matching first, then spectral diversity
/// (azimuth refinement needs a reasonably converged table to start from),
/// then the final full-resolution resample and differential interferogram.
pub struct CoregistrationEngine {
    config: CoregConfig,
}

impl CoregistrationEngine {
    pub fn new(config: CoregConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoregConfig {
        &self.config
    }

    /// Refine `initial_lut` so it registers `secondary` onto `reference`'s
    /// grid. `simulated_phase` is an optional topographic phase raster
    /// subtracted from the final interferogram.
    pub fn refine(
        &self,
        ctx: &EngineContext,
        reference: &SlcRaster,
        secondary: &SlcRaster,
        initial_lut: LookupTable,
        simulated_phase: Option<&RealImage>,
    ) -> CoregResult<CoregOutput> {
        self.validate(reference, secondary, &initial_lut, simulated_phase)?;
        log::info!(
            "Starting co-registration refinement: {}x{} reference, {}x{} secondary",
            reference.meta.azimuth_lines,
            reference.meta.range_samples,
            secondary.meta.azimuth_lines,
            secondary.meta.range_samples
        );

        let initial_offset_sum = self.initial_sanity_check(ctx, reference, secondary, &initial_lut)?;

        let intensity_loop = IntensityConvergenceLoop::new(self.config.intensity.clone());
        let intensity = intensity_loop.run(ctx, reference, secondary, initial_lut)?;

        let azimuth_loop = AzimuthConvergenceLoop::new(self.config.azimuth.clone());
        let azimuth = azimuth_loop.run(ctx, reference, secondary, intensity.lut)?;
        let lut = azimuth.lut;

        // final full-resolution products
        let resampled_secondary = ctx.kernel.resample_slc(secondary.data.view(), &lut);
        let differential_interferogram = self.differential_interferogram(
            ctx,
            reference.data.view(),
            resampled_secondary.view(),
            simulated_phase,
        );

        let mut report = QualityReport::new();
        report.snr_threshold = self.config.intensity.estimator.snr_threshold;
        report.coherence_threshold = self.config.azimuth.spectral.coherence_threshold;
        report.fraction_threshold = self.config.azimuth.spectral.fraction_threshold;
        report.phase_stdev_threshold = self.config.azimuth.spectral.phase_stdev_threshold;
        report.iterations = intensity
            .records
            .iter()
            .chain(azimuth.records.iter())
            .copied()
            .collect();
        if let Some(model) = intensity.last_model {
            report.range_residual_stdev = model.range_residual_stdev;
            report.azimuth_residual_stdev = model.azimuth_residual_stdev;
        }
        report.final_overlap_average = azimuth.final_phase_average;
        report.did_not_converge = !intensity.converged || !azimuth.converged;
        report.fit_aborted = intensity.fit_aborted;
        report.initial_offset_sum = initial_offset_sum;
        report.overlap_stats = azimuth.overlap_stats;
        report.generated = chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string();

        log::info!(
            "Co-registration finished (converged: {})",
            !report.did_not_converge
        );
        Ok(CoregOutput {
            lut,
            report,
            resampled_secondary,
            differential_interferogram,
        })
    }

    fn validate(
        &self,
        reference: &SlcRaster,
        secondary: &SlcRaster,
        lut: &LookupTable,
        simulated_phase: Option<&RealImage>,
    ) -> CoregResult<()> {
        if lut.dim() != reference.dim() {
            return Err(CoregError::Configuration(format!(
                "lookup table is {:?} but the reference grid is {:?}",
                lut.dim(),
                reference.dim()
            )));
        }
        if secondary.dim().0 == 0 || secondary.dim().1 == 0 {
            return Err(CoregError::Configuration("secondary raster is empty".into()));
        }
        if let Some(sim) = simulated_phase {
            if sim.dim() != reference.dim() {
                return Err(CoregError::Configuration(format!(
                    "simulated phase is {:?} but the reference grid is {:?}",
                    sim.dim(),
                    reference.dim()
                )));
            }
        }
        if self.config.zero_offset_tolerance < 0.0 {
            return Err(CoregError::Configuration(
                "zero offset tolerance must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Zero-offset sanity check: with the initial table applied, the summed
    /// azimuth offsets over all estimation windows must be distinguishable
    /// from zero. A sum inside the tolerance band marks a degenerate
    /// registration.
    fn initial_sanity_check(
        &self,
        ctx: &EngineContext,
        reference: &SlcRaster,
        secondary: &SlcRaster,
        lut: &LookupTable,
    ) -> CoregResult<f64> {
        let resampled = ctx.kernel.resample_slc(secondary.data.view(), lut);
        let ref_intensity = estimation_intensity(reference.data.view(), &reference.meta);
        let sec_intensity = estimation_intensity(resampled.view(), &reference.meta);

        let aoi = self
            .config
            .intensity
            .aoi
            .unwrap_or_else(|| AreaOfInterest::full(&reference.meta));
        aoi.validate(&reference.meta)?;
        let aoi = aoi.at_looks(
            reference.meta.range_looks.max(1) as usize,
            reference.meta.azimuth_looks.max(1) as usize,
        );

        let estimator = OffsetEstimator::new(self.config.intensity.estimator.clone());
        let field = estimator.estimate(ctx, ref_intensity.view(), sec_intensity.view(), &aoi);

        if field.is_empty() {
            return Err(CoregError::CoregistrationFailed(
                "no correlation window passed the SNR threshold on the initial pass".into(),
            ));
        }
        let sum = field.azimuth_offset_sum();
        log::info!("Sum of initial azimuth offsets is {} pixels", sum);
        if sum.abs() <= self.config.zero_offset_tolerance {
            return Err(CoregError::CoregistrationFailed(format!(
                "sum of initial azimuth offsets ({}) is indistinguishable from zero",
                sum
            )));
        }
        Ok(sum)
    }

    fn differential_interferogram(
        &self,
        ctx: &EngineContext,
        reference: ArrayView2<CpxSample>,
        resampled: ArrayView2<CpxSample>,
        simulated_phase: Option<&RealImage>,
    ) -> SlcImage {
        let mut ifg = ctx.kernel.interferogram(reference, resampled);
        if let Some(sim) = simulated_phase {
            // remove the simulated topographic/orbital phase
            for (v, &phi) in ifg.iter_mut().zip(sim.iter()) {
                *v *= CpxSample::new(phi.cos(), -phi.sin());
            }
        }
        ifg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::BuiltinKernel;
    use crate::types::{Raster, RasterMeta};
    use ndarray::Array2;

    fn noise_slc(rows: usize, cols: usize, seed: u64) -> Array2<CpxSample> {
        let mut state = seed.max(1);
        Array2::from_shape_fn((rows, cols), |_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            CpxSample::new((state % 10_000) as f32 / 10_000.0 + 0.1, 0.0)
        })
    }

    #[test]
    fn mismatched_lookup_table_is_a_configuration_error() {
        let meta = RasterMeta::with_dims(64, 64);
        let raster = Raster::new(noise_slc(64, 64, 3), meta).unwrap();
        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);

        let engine = CoregistrationEngine::new(CoregConfig::default());
        let result = engine.refine(
            &ctx,
            &raster,
            &raster,
            LookupTable::identity(32, 32),
            None,
        );
        assert!(matches!(result, Err(CoregError::Configuration(_))));
    }

    #[test]
    fn identical_scenes_trip_the_zero_offset_check() {
        // perfectly identical rasters estimate exactly-zero offsets, which
        // the sanity check treats as a degenerate registration
        let meta = RasterMeta::with_dims(160, 160);
        let raster = Raster::new(noise_slc(160, 160, 11), meta).unwrap();
        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);

        let mut config = CoregConfig::default();
        config.intensity.estimator.window_range = 32;
        config.intensity.estimator.window_azimuth = 32;
        config.intensity.estimator.step_range = 16;
        config.intensity.estimator.step_azimuth = 16;
        config.intensity.estimator.snr_threshold = 4.0;

        let engine = CoregistrationEngine::new(config);
        let result = engine.refine(
            &ctx,
            &raster,
            &raster,
            LookupTable::identity(160, 160),
            None,
        );
        assert!(matches!(result, Err(CoregError::CoregistrationFailed(_))));
    }

    #[test]
    fn flat_scenes_fail_with_no_usable_windows() {
        let meta = RasterMeta::with_dims(96, 96);
        let flat = Raster::new(
            Array2::from_elem((96, 96), CpxSample::new(0.5, 0.0)),
            meta,
        )
        .unwrap();
        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);

        let engine = CoregistrationEngine::new(CoregConfig::default());
        let result = engine.refine(&ctx, &flat, &flat, LookupTable::identity(96, 96), None);
        assert!(matches!(result, Err(CoregError::CoregistrationFailed(_))));
    }
}
