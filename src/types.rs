use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Complex-valued SLC data type (I + jQ)
pub type CpxSample = Complex<f32>;

/// 2D complex SLC data array (azimuth x range)
pub type SlcImage = Array2<CpxSample>;

/// 2D real intensity data array (azimuth x range)
pub type RealImage = Array2<f32>;

/// Timing and geometry metadata carried alongside every raster.
///
/// Keys mirror the GAMMA-style parameter file convention
/// (`range_samples`, `azimuth_lines`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterMeta {
    pub range_samples: usize,
    pub azimuth_lines: usize,
    pub range_looks: u32,
    pub azimuth_looks: u32,
    pub azimuth_line_time: f64,     // seconds per azimuth line
    pub range_pixel_spacing: f64,   // meters
    pub lines_per_burst: usize,
    /// Burst start times, seconds of day, one per burst
    pub burst_start_times: Vec<f64>,
    /// Doppler centroid rate difference between overlapping burst looks (Hz/s)
    pub doppler_centroid_rate_diff: f64,
}

impl RasterMeta {
    /// Metadata for a single-burst scene with unit timing, used when only
    /// the grid dimensions matter.
    pub fn with_dims(range_samples: usize, azimuth_lines: usize) -> Self {
        Self {
            range_samples,
            azimuth_lines,
            range_looks: 1,
            azimuth_looks: 1,
            azimuth_line_time: 2.0e-3,
            range_pixel_spacing: 2.33,
            lines_per_burst: azimuth_lines,
            burst_start_times: vec![0.0],
            doppler_centroid_rate_diff: 4000.0,
        }
    }

    pub fn same_shape(&self, other: &RasterMeta) -> bool {
        self.range_samples == other.range_samples && self.azimuth_lines == other.azimuth_lines
    }
}

/// A raster borrowed read-only by all processing components: sample grid
/// plus its timing metadata.
#[derive(Debug, Clone)]
pub struct Raster<T> {
    pub data: Array2<T>,
    pub meta: RasterMeta,
}

pub type SlcRaster = Raster<CpxSample>;
pub type MliRaster = Raster<f32>;

impl<T> Raster<T> {
    pub fn new(data: Array2<T>, meta: RasterMeta) -> CoregResult<Self> {
        let (lines, samples) = data.dim();
        if lines != meta.azimuth_lines || samples != meta.range_samples {
            return Err(CoregError::Configuration(format!(
                "raster data is {}x{} but metadata says {}x{}",
                lines, samples, meta.azimuth_lines, meta.range_samples
            )));
        }
        Ok(Self { data, meta })
    }

    /// (azimuth_lines, range_samples)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Per-pixel geometric map from the reference grid to fractional secondary
/// image coordinates. The grid geometry never changes during refinement,
/// only the stored coordinates.
#[derive(Debug, Clone)]
pub struct LookupTable {
    pub range: Array2<f32>,
    pub azimuth: Array2<f32>,
}

impl LookupTable {
    pub fn new(range: Array2<f32>, azimuth: Array2<f32>) -> CoregResult<Self> {
        if range.dim() != azimuth.dim() {
            return Err(CoregError::Configuration(format!(
                "lookup table component shapes differ: {:?} vs {:?}",
                range.dim(),
                azimuth.dim()
            )));
        }
        Ok(Self { range, azimuth })
    }

    /// Identity mapping: every reference pixel maps to itself.
    pub fn identity(azimuth_lines: usize, range_samples: usize) -> Self {
        let mut range = Array2::zeros((azimuth_lines, range_samples));
        let mut azimuth = Array2::zeros((azimuth_lines, range_samples));
        for az in 0..azimuth_lines {
            for rg in 0..range_samples {
                range[[az, rg]] = rg as f32;
                azimuth[[az, rg]] = az as f32;
            }
        }
        Self { range, azimuth }
    }

    /// Identity mapping shifted by a constant `(delta_range, delta_azimuth)`.
    pub fn constant_shift(
        azimuth_lines: usize,
        range_samples: usize,
        delta_range: f32,
        delta_azimuth: f32,
    ) -> Self {
        let mut lut = Self::identity(azimuth_lines, range_samples);
        lut.range.mapv_inplace(|v| v + delta_range);
        lut.azimuth.mapv_inplace(|v| v + delta_azimuth);
        lut
    }

    /// (azimuth_lines, range_samples)
    pub fn dim(&self) -> (usize, usize) {
        self.range.dim()
    }
}

/// Rectangular area of interest with inclusive pixel bounds, restricting
/// where correlation windows are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaOfInterest {
    pub range_start: usize,
    pub range_stop: usize,
    pub azimuth_start: usize,
    pub azimuth_stop: usize,
}

impl AreaOfInterest {
    /// The full raster extent.
    pub fn full(meta: &RasterMeta) -> Self {
        Self {
            range_start: 0,
            range_stop: meta.range_samples.saturating_sub(1),
            azimuth_start: 0,
            azimuth_stop: meta.azimuth_lines.saturating_sub(1),
        }
    }

    /// Bounds mapped onto a grid decimated by the look factors.
    pub fn at_looks(&self, range_looks: usize, azimuth_looks: usize) -> Self {
        let rl = range_looks.max(1);
        let al = azimuth_looks.max(1);
        Self {
            range_start: self.range_start / rl,
            range_stop: self.range_stop / rl,
            azimuth_start: self.azimuth_start / al,
            azimuth_stop: self.azimuth_stop / al,
        }
    }

    pub fn validate(&self, meta: &RasterMeta) -> CoregResult<()> {
        if self.range_stop < self.range_start || self.azimuth_stop < self.azimuth_start {
            return Err(CoregError::Configuration(format!(
                "area of interest bounds are inverted: {:?}",
                self
            )));
        }
        if self.range_stop >= meta.range_samples || self.azimuth_stop >= meta.azimuth_lines {
            return Err(CoregError::Configuration(format!(
                "area of interest {:?} exceeds the {}x{} raster",
                self, meta.azimuth_lines, meta.range_samples
            )));
        }
        Ok(())
    }
}

/// One accepted correlation window result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetSample {
    pub window_row: usize,
    pub window_col: usize,
    pub delta_range: f64,
    pub delta_azimuth: f64,
    pub snr: f64,
}

/// Sparse field of per-window offset estimates, ordered by window position.
/// Produced fresh by each estimation pass and consumed once by the fitter.
#[derive(Debug, Clone, Default)]
pub struct OffsetField {
    pub samples: Vec<OffsetSample>,
}

impl OffsetField {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sum of the azimuth components, used by the engine's initial
    /// degenerate-registration check.
    pub fn azimuth_offset_sum(&self) -> f64 {
        self.samples.iter().map(|s| s.delta_azimuth).sum()
    }
}

/// Supported polynomial model sizes for the offset fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolyOrder {
    /// Constant offset only
    Constant,
    /// Constant + linear range/azimuth terms
    Affine,
    /// Affine + cross term
    Bilinear,
    /// Bilinear + quadratic range/azimuth terms
    Quadratic,
}

impl PolyOrder {
    pub fn num_coeffs(&self) -> usize {
        match self {
            PolyOrder::Constant => 1,
            PolyOrder::Affine => 3,
            PolyOrder::Bilinear => 4,
            PolyOrder::Quadratic => 6,
        }
    }

    /// Basis row `[1, r, a, r*a, r^2, a^2]` truncated to this order.
    pub fn basis(&self, range: f64, azimuth: f64) -> Vec<f64> {
        let full = [
            1.0,
            range,
            azimuth,
            range * azimuth,
            range * range,
            azimuth * azimuth,
        ];
        full[..self.num_coeffs()].to_vec()
    }
}

/// Fitted 2D offset polynomial, coefficients in the order
/// `[1, r, a, r*a, r^2, a^2]` (unused trailing coefficients are zero).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialModel {
    pub range_coeffs: [f64; 6],
    pub azimuth_coeffs: [f64; 6],
    pub range_residual_stdev: f64,
    pub azimuth_residual_stdev: f64,
}

impl PolynomialModel {
    pub fn zero() -> Self {
        Self {
            range_coeffs: [0.0; 6],
            azimuth_coeffs: [0.0; 6],
            range_residual_stdev: 0.0,
            azimuth_residual_stdev: 0.0,
        }
    }

    /// Constant azimuth-only correction, used by the spectral diversity loop.
    pub fn azimuth_constant(delta_azimuth: f64) -> Self {
        let mut model = Self::zero();
        model.azimuth_coeffs[0] = delta_azimuth;
        model
    }

    fn eval(coeffs: &[f64; 6], r: f64, a: f64) -> f64 {
        coeffs[0]
            + coeffs[1] * r
            + coeffs[2] * a
            + coeffs[3] * r * a
            + coeffs[4] * r * r
            + coeffs[5] * a * a
    }

    pub fn eval_range(&self, range: f64, azimuth: f64) -> f64 {
        Self::eval(&self.range_coeffs, range, azimuth)
    }

    pub fn eval_azimuth(&self, range: f64, azimuth: f64) -> f64 {
        Self::eval(&self.azimuth_coeffs, range, azimuth)
    }
}

/// One azimuth burst of a TOPS sub-swath.
#[derive(Debug, Clone, Copy)]
pub struct Burst {
    /// Azimuth start time, seconds of day
    pub start_time: f64,
    pub lines_per_burst: usize,
    /// Line offset to the next burst's first line, fractional
    pub lines_offset_fractional: f64,
    /// The same offset rounded to whole lines; geometry indexing uses the
    /// integer form while timing keeps the fractional one.
    pub lines_offset_rounded: i64,
}

/// Region where burst `i` and burst `i + 1` image the same ground strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstOverlap {
    pub range_start: usize,
    pub range_stop: usize,
    /// First line of the strip inside the earlier burst
    pub azimuth_start_earlier: usize,
    /// First line of the strip inside the later burst
    pub azimuth_start_later: usize,
    pub num_lines: usize,
}

/// Double-difference phase and coherence statistics for one burst overlap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlapStatistics {
    pub phase_mean: f64,
    pub phase_stdev: f64,
    pub phase_valid_fraction: f64,
    pub coherence_mean: f64,
    pub coherence_stdev: f64,
    pub coherence_valid_fraction: f64,
}

impl OverlapStatistics {
    /// All-zero statistics for a degenerate overlap; weighted out later,
    /// never dropped from the report.
    pub fn degenerate() -> Self {
        Self {
            phase_mean: 0.0,
            phase_stdev: 0.0,
            phase_valid_fraction: 0.0,
            coherence_mean: 0.0,
            coherence_stdev: 0.0,
            coherence_valid_fraction: 0.0,
        }
    }

    /// Phase valid fraction normalized by the coherence valid fraction.
    /// Kept alongside the raw fraction; which one gates the weighting is a
    /// configuration choice.
    pub fn normalized_phase_fraction(&self) -> f64 {
        if self.coherence_valid_fraction > 0.0 {
            self.phase_valid_fraction / self.coherence_valid_fraction
        } else {
            0.0
        }
    }
}

/// Which refinement stage produced an iteration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefinementStage {
    Intensity,
    SpectralDiversity,
}

impl std::fmt::Display for RefinementStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefinementStage::Intensity => write!(f, "intensity"),
            RefinementStage::SpectralDiversity => write!(f, "spectral_diversity"),
        }
    }
}

/// Convergence record for one refinement iteration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IterationRecord {
    pub stage: RefinementStage,
    pub iteration: u32,
    pub range_correction: f64,
    /// Azimuth correction in multi-look pixels for the intensity stage,
    /// SLC pixels for the spectral diversity stage
    pub azimuth_correction: f64,
}

/// Accumulated quality record for one engine run: thresholds in force,
/// per-iteration corrections, final statistics and the sanity value.
/// Persisted alongside the refined lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub snr_threshold: f64,
    pub coherence_threshold: f64,
    pub fraction_threshold: f64,
    pub phase_stdev_threshold: f64,
    pub iterations: Vec<IterationRecord>,
    pub range_residual_stdev: f64,
    pub azimuth_residual_stdev: f64,
    /// Final weighted average of the overlap double-difference phases (rad)
    pub final_overlap_average: f64,
    pub did_not_converge: bool,
    /// True when an offset fit ran out of accepted samples and the
    /// intensity loop rolled back to its last good table (non-fatal)
    pub fit_aborted: bool,
    /// Sum of the initial per-window azimuth offsets (pixels)
    pub initial_offset_sum: f64,
    pub overlap_stats: Vec<OverlapStatistics>,
    pub generated: String,
}

impl QualityReport {
    pub fn new() -> Self {
        Self {
            snr_threshold: 0.0,
            coherence_threshold: 0.0,
            fraction_threshold: 0.0,
            phase_stdev_threshold: 0.0,
            iterations: Vec::new(),
            range_residual_stdev: 0.0,
            azimuth_residual_stdev: 0.0,
            final_overlap_average: 0.0,
            did_not_converge: false,
            fit_aborted: false,
            initial_offset_sum: 0.0,
            overlap_stats: Vec::new(),
            generated: String::new(),
        }
    }
}

impl Default for QualityReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Error types for co-registration processing
#[derive(Debug, thiserror::Error)]
pub enum CoregError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("insufficient offset samples for fit: {got} accepted, {needed} required")]
    InsufficientSamples { needed: usize, got: usize },

    #[error("co-registration failed: {0}")]
    CoregistrationFailed(String),
}

/// Result type for co-registration operations
pub type CoregResult<T> = Result<T, CoregError>;
