//! Core co-registration refinement modules

pub mod azimuth;
pub mod context;
pub mod engine;
pub mod intensity;
pub mod lut;
pub mod offset;
pub mod overlap;
pub mod polyfit;
pub mod spectral;

// Re-export main types
pub use azimuth::{AzimuthConvergenceLoop, AzimuthLoopOutcome, AzimuthLoopParams};
pub use context::{CancelToken, EngineContext};
pub use engine::{CoregConfig, CoregOutput, CoregistrationEngine};
pub use intensity::{IntensityConvergenceLoop, IntensityLoopOutcome, IntensityLoopParams};
pub use lut::LookupTableRefiner;
pub use offset::{OffsetEstimator, OffsetEstimatorParams};
pub use overlap::{derive_bursts, derive_overlaps, BurstOverlapParams, BurstOverlapProcessor};
pub use polyfit::{PolynomialFitter, PolynomialFitterParams, WeightMode};
pub use spectral::{
    phase_to_pixel_offset, FractionGate, SpectralDiversityAggregator, SpectralDiversityParams,
};
