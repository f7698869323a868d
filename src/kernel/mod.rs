//! Closed numeric-kernel interface.
//!
//! The refinement engine orchestrates *when* the heavy numeric primitives
//! run and how their outputs are combined; the primitives themselves sit
//! behind this small trait so a different backend (or a test double) can be
//! swapped in without touching the orchestration code.

mod builtin;

pub use builtin::BuiltinKernel;

use ndarray::{ArrayView1, ArrayView2};

use crate::types::{CoregResult, CpxSample, LookupTable, RealImage, SlcImage};

/// Result of one windowed cross-correlation: sub-pixel shift of the
/// secondary window relative to the reference window, plus the peak SNR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    pub delta_range: f64,
    pub delta_azimuth: f64,
    pub snr: f64,
}

/// Optional post-processing primitives a backend may provide. Resolved once
/// when the engine context is built and checked as plain booleans.
#[derive(Debug, Clone, Copy)]
pub struct KernelCapabilities {
    pub adaptive_filter: bool,
    pub phase_unwrap: bool,
}

impl Default for KernelCapabilities {
    fn default() -> Self {
        Self {
            adaptive_filter: true,
            phase_unwrap: true,
        }
    }
}

/// The black-box numeric primitives the co-registration core depends on.
pub trait NumericKernel: Send + Sync {
    /// Cross-correlate two equally sized intensity windows. `oversample`
    /// controls the correlation-surface oversampling factor. Returns `None`
    /// when the correlation peak is ambiguous or undefined (flat window,
    /// multiple competing maxima); such windows are omitted upstream, never
    /// zero-filled.
    fn correlate(
        &self,
        reference: ArrayView2<f32>,
        secondary: ArrayView2<f32>,
        oversample: usize,
    ) -> Option<CorrelationPeak>;

    /// Single-look interferogram: `earlier * conj(later)`, element-wise.
    fn interferogram(
        &self,
        earlier: ArrayView2<CpxSample>,
        later: ArrayView2<CpxSample>,
    ) -> SlcImage;

    /// Solve the weighted least-squares system `basis * x ~ rhs` with one
    /// weight per row. Design-matrix assembly, weighting policy and outlier
    /// rejection are the caller's business; this is the solve only.
    fn fit_polynomial(
        &self,
        basis: ArrayView2<f64>,
        rhs: ArrayView1<f64>,
        weights: ArrayView1<f64>,
    ) -> CoregResult<Vec<f64>>;

    /// Apply a lookup table to complex data: the output pixel `(az, rg)`
    /// takes the interpolated value at the table's fractional coordinates.
    /// Coordinates falling outside the input grid produce zero samples.
    fn resample_slc(&self, data: ArrayView2<CpxSample>, lut: &LookupTable) -> SlcImage;

    /// Same as [`NumericKernel::resample_slc`] for real-valued data.
    fn resample_real(&self, data: ArrayView2<f32>, lut: &LookupTable) -> RealImage;

    fn capabilities(&self) -> KernelCapabilities {
        KernelCapabilities::default()
    }
}
