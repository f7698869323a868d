use ndarray::Array2;

use crate::core::context::EngineContext;
use crate::types::{CoregError, CoregResult, LookupTable, PolynomialModel};

/// Composes a lookup table with a polynomial offset correction.
///
/// The correction is rasterized on the estimation grid and brought onto the
/// lookup table's own indexing through the same resampling primitive used
/// for images, because the table may live on a coarser multi-look grid than
/// the estimate. The input table is never mutated; the caller keeps it
/// until the new one is validated, so a failed fit can roll back.
pub struct LookupTableRefiner;

impl LookupTableRefiner {
    pub fn new() -> Self {
        Self
    }

    /// Apply `model` (expressed in estimation-grid pixels) to `lut`.
    /// `unit_scale` converts estimation-grid pixels into the table's
    /// coordinate units (the range/azimuth look factors).
    pub fn refine(
        &self,
        ctx: &EngineContext,
        lut: &LookupTable,
        model: &PolynomialModel,
        estimation_dims: (usize, usize),
        unit_scale: (f64, f64),
    ) -> CoregResult<LookupTable> {
        let (est_rows, est_cols) = estimation_dims;
        if est_rows == 0 || est_cols == 0 {
            return Err(CoregError::Configuration(
                "estimation grid for lookup table refinement is empty".into(),
            ));
        }
        let (rg_scale, az_scale) = unit_scale;

        let corr_rg = Array2::from_shape_fn((est_rows, est_cols), |(i, j)| {
            (model.eval_range(j as f64, i as f64) * rg_scale) as f32
        });
        let corr_az = Array2::from_shape_fn((est_rows, est_cols), |(i, j)| {
            (model.eval_azimuth(j as f64, i as f64) * az_scale) as f32
        });

        let grid_map = grid_mapping(lut.dim(), estimation_dims);
        let corr_rg = ctx.kernel.resample_real(corr_rg.view(), &grid_map);
        let corr_az = ctx.kernel.resample_real(corr_az.view(), &grid_map);

        let range = &lut.range + &corr_rg;
        let azimuth = &lut.azimuth + &corr_az;
        LookupTable::new(range, azimuth)
    }
}

impl Default for LookupTableRefiner {
    fn default() -> Self {
        Self::new()
    }
}

/// Lookup table mapping every pixel of the `target` grid to its fractional
/// position on the `source` grid.
fn grid_mapping(target: (usize, usize), source: (usize, usize)) -> LookupTable {
    let (t_rows, t_cols) = target;
    let (s_rows, s_cols) = source;
    let az_step = if t_rows > 1 {
        (s_rows - 1) as f32 / (t_rows - 1) as f32
    } else {
        0.0
    };
    let rg_step = if t_cols > 1 {
        (s_cols - 1) as f32 / (t_cols - 1) as f32
    } else {
        0.0
    };

    let mut range = Array2::zeros((t_rows, t_cols));
    let mut azimuth = Array2::zeros((t_rows, t_cols));
    for i in 0..t_rows {
        for j in 0..t_cols {
            azimuth[[i, j]] = i as f32 * az_step;
            range[[i, j]] = j as f32 * rg_step;
        }
    }
    LookupTable { range, azimuth }
}
