//! sarcoreg: Iterative Sentinel-1 TOPS Co-Registration Refinement
//!
//! This library refines a geometric lookup table mapping a secondary SLC
//! scene onto a reference grid. Windowed intensity cross-correlation drives
//! the first refinement stage; spectral diversity over burst overlaps
//! drives the second, azimuth-only stage. All numeric primitives sit
//! behind a kernel trait so the pipeline stays testable end to end.

pub mod core;
pub mod io;
pub mod kernel;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::core::{
    CancelToken, CoregConfig, CoregOutput, CoregistrationEngine, EngineContext,
};
pub use kernel::{BuiltinKernel, KernelCapabilities, NumericKernel};
pub use types::{
    AreaOfInterest, CoregError, CoregResult, CpxSample, LookupTable, QualityReport, Raster,
    RasterMeta, RealImage, SlcImage, SlcRaster,
};

use types::MliRaster;

/// Refine `initial_lut` with the default configuration and the built-in
/// numeric kernel. Convenience wrapper over [`CoregistrationEngine`].
pub fn refine(
    reference: &SlcRaster,
    secondary: &SlcRaster,
    initial_lut: LookupTable,
) -> CoregResult<CoregOutput> {
    let kernel = BuiltinKernel::new();
    let ctx = EngineContext::new(&kernel);
    CoregistrationEngine::new(CoregConfig::default()).refine(
        &ctx,
        reference,
        secondary,
        initial_lut,
        None,
    )
}

/// Multi-looked intensity of an SLC raster, averaged over
/// `range_looks x azimuth_looks` blocks from its metadata.
pub fn multilook_intensity(slc: &SlcRaster) -> CoregResult<MliRaster> {
    let intensity = crate::core::intensity::intensity_image(slc.data.view());
    let looked = crate::core::overlap::multilook_real(
        intensity.view(),
        slc.meta.azimuth_looks.max(1) as usize,
        slc.meta.range_looks.max(1) as usize,
    );
    let mut meta = slc.meta.clone();
    meta.azimuth_lines = looked.dim().0;
    meta.range_samples = looked.dim().1;
    Raster::new(looked, meta)
}
