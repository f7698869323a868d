use serde::{Deserialize, Serialize};

use crate::core::context::EngineContext;
use crate::core::lut::LookupTableRefiner;
use crate::core::overlap::{derive_overlaps, BurstOverlapParams, BurstOverlapProcessor};
use crate::core::spectral::{
    phase_to_pixel_offset, SpectralDiversityAggregator, SpectralDiversityParams,
};
use crate::types::{
    CoregResult, IterationRecord, LookupTable, OverlapStatistics, PolynomialModel,
    RefinementStage, SlcRaster,
};

// Tighter than the intensity stage: converged when |daz * 10000| < 5,
// i.e. below 0.0005 azimuth pixels.
const CONVERGENCE_THRESHOLD_X10K: f64 = 5.0;

/// Azimuth refinement loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzimuthLoopParams {
    pub max_iterations: u32,
    pub overlap: BurstOverlapParams,
    pub spectral: SpectralDiversityParams,
}

impl Default for AzimuthLoopParams {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            overlap: BurstOverlapParams::default(),
            spectral: SpectralDiversityParams::default(),
        }
    }
}

/// Result of the spectral diversity refinement.
#[derive(Debug)]
pub struct AzimuthLoopOutcome {
    pub lut: LookupTable,
    pub records: Vec<IterationRecord>,
    pub converged: bool,
    /// Statistics of the last processed pass, one entry per overlap
    pub overlap_stats: Vec<OverlapStatistics>,
    /// Weighted double-difference phase of the last pass (rad)
    pub final_phase_average: f64,
}

/// Spectral diversity azimuth refinement: re-derives the burst overlap
/// regions from the current lookup table each pass (refinement shifts the
/// overlap geometry), measures the weighted double-difference phase and
/// applies the resulting azimuth-only correction.
pub struct AzimuthConvergenceLoop {
    params: AzimuthLoopParams,
    processor: BurstOverlapProcessor,
    aggregator: SpectralDiversityAggregator,
    refiner: LookupTableRefiner,
}

impl AzimuthConvergenceLoop {
    pub fn new(params: AzimuthLoopParams) -> Self {
        let processor = BurstOverlapProcessor::new(params.overlap.clone());
        let aggregator = SpectralDiversityAggregator::new(params.spectral.clone());
        Self {
            params,
            processor,
            aggregator,
            refiner: LookupTableRefiner::new(),
        }
    }

    pub fn run(
        &self,
        ctx: &EngineContext,
        reference: &SlcRaster,
        secondary: &SlcRaster,
        initial_lut: LookupTable,
    ) -> CoregResult<AzimuthLoopOutcome> {
        let mut lut = initial_lut;
        let mut records = Vec::new();
        let mut converged = false;
        let mut overlap_stats = Vec::new();
        let mut final_phase_average = 0.0;

        for iteration in 1..=self.params.max_iterations {
            if ctx.cancel.is_cancelled() {
                log::warn!("Azimuth refinement cancelled at iteration {}", iteration);
                break;
            }

            let resampled = ctx.kernel.resample_slc(secondary.data.view(), &lut);
            let overlaps = derive_overlaps(&reference.meta, Some(&lut));
            if overlaps.is_empty() {
                log::info!("No burst overlaps available; azimuth correction is zero");
                converged = true;
                break;
            }

            let stats = self.processor.process_all(
                ctx,
                reference.data.view(),
                resampled.view(),
                &overlaps,
            );
            let outcome = self.aggregator.aggregate(&stats);
            let daz = phase_to_pixel_offset(outcome.phase, &reference.meta);

            overlap_stats = stats;
            final_phase_average = outcome.phase;
            records.push(IterationRecord {
                stage: RefinementStage::SpectralDiversity,
                iteration,
                range_correction: 0.0,
                azimuth_correction: daz,
            });
            log::info!(
                "Spectral diversity iteration {}: azimuth correction {:.6} px",
                iteration,
                daz
            );

            // Convergence is decided before the update so a converged table
            // survives re-running the loop unchanged.
            if (daz * 10_000.0).abs() < CONVERGENCE_THRESHOLD_X10K {
                converged = true;
                log::info!("Azimuth refinement converged after {} iterations", iteration);
                break;
            }

            // The correction is already in table units; no look scaling.
            lut = self.refiner.refine(
                ctx,
                &lut,
                &PolynomialModel::azimuth_constant(daz),
                lut.dim(),
                (1.0, 1.0),
            )?;
        }

        if !converged {
            log::warn!(
                "Azimuth refinement did not converge within {} iterations",
                self.params.max_iterations
            );
        }

        Ok(AzimuthLoopOutcome {
            lut,
            records,
            converged,
            overlap_stats,
            final_phase_average,
        })
    }
}
