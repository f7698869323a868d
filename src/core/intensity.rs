use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::core::context::EngineContext;
use crate::core::lut::LookupTableRefiner;
use crate::core::offset::{OffsetEstimator, OffsetEstimatorParams};
use crate::core::overlap::multilook_real;
use crate::core::polyfit::{PolynomialFitter, PolynomialFitterParams};
use crate::types::{
    AreaOfInterest, CoregError, CoregResult, IterationRecord, LookupTable, PolynomialModel,
    RasterMeta, RefinementStage, SlcRaster,
};

// Legacy convergence convention: done when |daz_mli * 10000| < 100,
// i.e. the azimuth correction drops below 0.01 multi-look pixels. Fixed,
// not caller-tunable.
const CONVERGENCE_THRESHOLD_X10K: f64 = 100.0;

/// Intensity matching loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntensityLoopParams {
    pub max_iterations: u32,
    pub estimator: OffsetEstimatorParams,
    pub fitter: PolynomialFitterParams,
    /// Optional AOI restriction for the correlation windows
    pub aoi: Option<AreaOfInterest>,
}

impl Default for IntensityLoopParams {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            estimator: OffsetEstimatorParams::default(),
            fitter: PolynomialFitterParams::default(),
            aoi: None,
        }
    }
}

/// Result of an intensity refinement run. The lookup table is always the
/// last fully committed one, whatever ended the loop.
#[derive(Debug)]
pub struct IntensityLoopOutcome {
    pub lut: LookupTable,
    pub records: Vec<IterationRecord>,
    pub converged: bool,
    /// True when a fit failure ended the loop early (non-fatal; the last
    /// good table is kept)
    pub fit_aborted: bool,
    /// Model from the last successful fit, for residual reporting
    pub last_model: Option<PolynomialModel>,
}

/// Iterative intensity-matching refinement:
/// Resample -> Estimate -> Fit -> Update -> CheckConverged.
pub struct IntensityConvergenceLoop {
    params: IntensityLoopParams,
    estimator: OffsetEstimator,
    fitter: PolynomialFitter,
    refiner: LookupTableRefiner,
}

impl IntensityConvergenceLoop {
    pub fn new(params: IntensityLoopParams) -> Self {
        let estimator = OffsetEstimator::new(params.estimator.clone());
        let fitter = PolynomialFitter::new(params.fitter.clone());
        Self {
            params,
            estimator,
            fitter,
            refiner: LookupTableRefiner::new(),
        }
    }

    pub fn run(
        &self,
        ctx: &EngineContext,
        reference: &SlcRaster,
        secondary: &SlcRaster,
        initial_lut: LookupTable,
    ) -> CoregResult<IntensityLoopOutcome> {
        let rg_looks = reference.meta.range_looks.max(1) as usize;
        let az_looks = reference.meta.azimuth_looks.max(1) as usize;
        let ref_intensity = estimation_intensity(reference.data.view(), &reference.meta);
        let est_dims = ref_intensity.dim();

        let aoi = self
            .params
            .aoi
            .unwrap_or_else(|| AreaOfInterest::full(&reference.meta));
        aoi.validate(&reference.meta)?;
        let aoi = aoi.at_looks(rg_looks, az_looks);

        // Offsets are estimated on the multi-looked grid; converting them
        // into table units multiplies by the look factors.
        let unit_scale = (rg_looks as f64, az_looks as f64);
        let (center_az, center_rg) = grid_center(est_dims);

        let mut lut = initial_lut;
        let mut records = Vec::new();
        let mut converged = false;
        let mut fit_aborted = false;
        let mut last_model = None;

        for iteration in 1..=self.params.max_iterations {
            if ctx.cancel.is_cancelled() {
                log::warn!("Intensity refinement cancelled at iteration {}", iteration);
                break;
            }

            // Resample: scratch rasters live only for this iteration.
            let resampled = ctx.kernel.resample_slc(secondary.data.view(), &lut);
            let sec_intensity = estimation_intensity(resampled.view(), &reference.meta);

            let field = self
                .estimator
                .estimate(ctx, ref_intensity.view(), sec_intensity.view(), &aoi);
            if field.is_empty() {
                log::warn!(
                    "No correlation window passed the SNR threshold at iteration {}; \
                     keeping the current lookup table",
                    iteration
                );
                break;
            }

            let model = match self.fitter.fit(ctx, &field) {
                Ok(model) => model,
                Err(CoregError::InsufficientSamples { needed, got }) => {
                    log::warn!(
                        "Offset fit aborted at iteration {} ({} samples, {} required); \
                         rolling back to the last good lookup table",
                        iteration,
                        got,
                        needed
                    );
                    fit_aborted = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            let daz = model.eval_azimuth(center_rg, center_az);
            let drg = model.eval_range(center_rg, center_az);
            records.push(IterationRecord {
                stage: RefinementStage::Intensity,
                iteration,
                range_correction: drg,
                azimuth_correction: daz,
            });
            log::info!(
                "Intensity iteration {}: correction rg {:.5} / az {:.5} mli px",
                iteration,
                drg,
                daz
            );
            last_model = Some(model);

            // Convergence is decided on the measured correction before it
            // is applied: a below-threshold correction leaves the committed
            // table untouched, so re-running the loop on a converged table
            // converges again in one iteration.
            if (daz * 10_000.0).abs() < CONVERGENCE_THRESHOLD_X10K {
                converged = true;
                log::info!("Intensity refinement converged after {} iterations", iteration);
                break;
            }

            lut = self
                .refiner
                .refine(ctx, &lut, &model, est_dims, unit_scale)?;
        }

        if !converged && !fit_aborted {
            log::warn!(
                "Intensity refinement did not converge within {} iterations",
                self.params.max_iterations
            );
        }

        Ok(IntensityLoopOutcome {
            lut,
            records,
            converged,
            fit_aborted,
            last_model,
        })
    }
}

/// Detected power of complex samples.
pub fn intensity_image(data: ArrayView2<crate::types::CpxSample>) -> Array2<f32> {
    data.mapv(|v| v.norm_sqr())
}

/// Detected power multi-looked at the metadata look factors: the grid the
/// offset estimation runs on.
pub fn estimation_intensity(
    data: ArrayView2<crate::types::CpxSample>,
    meta: &RasterMeta,
) -> Array2<f32> {
    let az_looks = meta.azimuth_looks.max(1) as usize;
    let rg_looks = meta.range_looks.max(1) as usize;
    let intensity = intensity_image(data);
    if az_looks == 1 && rg_looks == 1 {
        return intensity;
    }
    multilook_real(intensity.view(), az_looks, rg_looks)
}

fn grid_center(dim: (usize, usize)) -> (f64, f64) {
    ((dim.0 / 2) as f64, (dim.1 / 2) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{BuiltinKernel, NumericKernel};
    use crate::types::{CpxSample, PolyOrder, Raster, RasterMeta};
    use ndarray::Array2;

    fn smooth_noise_slc(rows: usize, cols: usize, seed: u64) -> Array2<CpxSample> {
        let mut state = seed.max(1);
        let raw = Array2::from_shape_fn((rows, cols), |_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 10_000) as f32 / 10_000.0
        });
        // box smoothing keeps the field correlatable after interpolation
        let mut smooth = raw.clone();
        for _ in 0..2 {
            let prev = smooth.clone();
            for i in 1..rows - 1 {
                for j in 1..cols - 1 {
                    let mut acc = 0.0;
                    for di in 0..3 {
                        for dj in 0..3 {
                            acc += prev[[i + di - 1, j + dj - 1]];
                        }
                    }
                    smooth[[i, j]] = acc / 9.0;
                }
            }
        }
        smooth.mapv(|v| CpxSample::new(v + 0.1, 0.0))
    }

    fn test_params() -> IntensityLoopParams {
        IntensityLoopParams {
            max_iterations: 5,
            estimator: OffsetEstimatorParams {
                window_range: 32,
                window_azimuth: 32,
                step_range: 16,
                step_azimuth: 16,
                oversample: 2,
                snr_threshold: 4.0,
            },
            fitter: PolynomialFitterParams {
                order: PolyOrder::Constant,
                min_samples: 8,
                ..Default::default()
            },
            aoi: None,
        }
    }

    #[test]
    fn identical_scenes_converge_in_one_iteration() {
        let data = smooth_noise_slc(160, 160, 77);
        let meta = RasterMeta::with_dims(160, 160);
        let reference = Raster::new(data.clone(), meta.clone()).unwrap();
        let secondary = Raster::new(data, meta).unwrap();

        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);
        let looper = IntensityConvergenceLoop::new(test_params());
        let outcome = looper
            .run(&ctx, &reference, &secondary, LookupTable::identity(160, 160))
            .unwrap();

        assert!(outcome.converged);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].azimuth_correction.abs() < 0.01);
    }

    #[test]
    fn already_converged_table_stays_converged() {
        let data = smooth_noise_slc(160, 160, 31);
        let meta = RasterMeta::with_dims(160, 160);
        let reference = Raster::new(data.clone(), meta.clone()).unwrap();
        let secondary = Raster::new(data, meta).unwrap();

        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);
        let looper = IntensityConvergenceLoop::new(test_params());

        let first = looper
            .run(&ctx, &reference, &secondary, LookupTable::identity(160, 160))
            .unwrap();
        let second = looper.run(&ctx, &reference, &secondary, first.lut).unwrap();

        assert!(second.converged);
        assert_eq!(second.records.len(), 1);
        assert!(second.records[0].azimuth_correction.abs() < 0.01);
    }

    #[test]
    fn constant_shift_is_recovered() {
        let data = smooth_noise_slc(160, 160, 123);
        let meta = RasterMeta::with_dims(160, 160);
        let reference = Raster::new(data.clone(), meta.clone()).unwrap();

        // secondary content displaced by (+2, -1) pixels in (range, azimuth)
        let kernel = BuiltinKernel::new();
        let shift_lut = LookupTable::constant_shift(160, 160, -2.0, 1.0);
        let shifted = kernel.resample_slc(data.view(), &shift_lut);
        let secondary = Raster::new(shifted, meta).unwrap();

        let ctx = EngineContext::new(&kernel);
        let looper = IntensityConvergenceLoop::new(test_params());
        let outcome = looper
            .run(&ctx, &reference, &secondary, LookupTable::identity(160, 160))
            .unwrap();

        assert!(outcome.converged);
        let lut = &outcome.lut;
        // correction integrates to the synthetic shift in the scene interior
        let drg = lut.range[[80, 80]] - 80.0;
        let daz = lut.azimuth[[80, 80]] - 80.0;
        assert!((drg - 2.0).abs() < 0.2, "range correction {}", drg);
        assert!((daz + 1.0).abs() < 0.2, "azimuth correction {}", daz);
    }

    #[test]
    fn declared_looks_keep_the_correction_in_table_units() {
        // the same physical shift must come back whatever estimation grid
        // the look factors select
        let data = smooth_noise_slc(160, 160, 123);
        let mut meta = RasterMeta::with_dims(160, 160);
        meta.range_looks = 2;
        meta.azimuth_looks = 2;
        let reference = Raster::new(data.clone(), meta.clone()).unwrap();

        let kernel = BuiltinKernel::new();
        let shift_lut = LookupTable::constant_shift(160, 160, -2.0, 1.0);
        let shifted = kernel.resample_slc(data.view(), &shift_lut);
        let secondary = Raster::new(shifted, meta).unwrap();

        let ctx = EngineContext::new(&kernel);
        let looper = IntensityConvergenceLoop::new(test_params());
        let outcome = looper
            .run(&ctx, &reference, &secondary, LookupTable::identity(160, 160))
            .unwrap();

        assert!(outcome.converged);
        let drg = outcome.lut.range[[80, 80]] - 80.0;
        let daz = outcome.lut.azimuth[[80, 80]] - 80.0;
        assert!((drg - 2.0).abs() < 0.3, "range correction {}", drg);
        assert!((daz + 1.0).abs() < 0.3, "azimuth correction {}", daz);
    }

    #[test]
    fn fit_abort_keeps_the_initial_table() {
        let data = smooth_noise_slc(160, 160, 41);
        let meta = RasterMeta::with_dims(160, 160);
        let reference = Raster::new(data.clone(), meta.clone()).unwrap();
        let secondary = Raster::new(data, meta).unwrap();

        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);
        let mut params = test_params();
        // more samples than the window grid can ever produce
        params.fitter.min_samples = 1000;

        let looper = IntensityConvergenceLoop::new(params);
        let outcome = looper
            .run(&ctx, &reference, &secondary, LookupTable::identity(160, 160))
            .unwrap();

        assert!(outcome.fit_aborted);
        assert!(!outcome.converged);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.lut.range[[80, 80]], 80.0);
        assert_eq!(outcome.lut.azimuth[[80, 80]], 80.0);
    }

    #[test]
    fn cancellation_returns_initial_table() {
        let data = smooth_noise_slc(96, 96, 9);
        let meta = RasterMeta::with_dims(96, 96);
        let reference = Raster::new(data.clone(), meta.clone()).unwrap();
        let secondary = Raster::new(data, meta).unwrap();

        let kernel = BuiltinKernel::new();
        let ctx = EngineContext::new(&kernel);
        ctx.cancel.cancel();

        let looper = IntensityConvergenceLoop::new(test_params());
        let outcome = looper
            .run(&ctx, &reference, &secondary, LookupTable::identity(96, 96))
            .unwrap();
        assert!(!outcome.converged);
        assert!(outcome.records.is_empty());
    }
}
