use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::core::context::EngineContext;
use crate::types::{
    CoregError, CoregResult, OffsetField, PolyOrder, PolynomialModel,
};

/// How offset samples are weighted in the least-squares fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightMode {
    /// Weight each sample by its correlation SNR
    Snr,
    /// All samples weighted equally
    Uniform,
}

/// Polynomial fit parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolynomialFitterParams {
    pub order: PolyOrder,
    pub weight_mode: WeightMode,
    /// Minimum accepted sample count; must exceed the model's degrees of
    /// freedom regardless of this setting
    pub min_samples: usize,
    /// Residual rejection threshold in multiples of the residual stdev
    pub outlier_sigma: f64,
}

impl Default for PolynomialFitterParams {
    fn default() -> Self {
        Self {
            order: PolyOrder::Bilinear,
            weight_mode: WeightMode::Snr,
            min_samples: 8,
            outlier_sigma: 3.0,
        }
    }
}

/// Fits the 2D range/azimuth offset polynomial to a sparse offset field,
/// with one outlier-rejection pass. A failed fit is fatal for the current
/// refinement iteration; the convergence loop keeps the last good lookup
/// table instead of applying a degenerate model.
pub struct PolynomialFitter {
    params: PolynomialFitterParams,
}

impl PolynomialFitter {
    pub fn new(params: PolynomialFitterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PolynomialFitterParams {
        &self.params
    }

    pub fn fit(&self, ctx: &EngineContext, field: &OffsetField) -> CoregResult<PolynomialModel> {
        let ncoef = self.params.order.num_coeffs();
        let needed = self.params.min_samples.max(ncoef + 1);
        if field.len() < needed {
            return Err(CoregError::InsufficientSamples {
                needed,
                got: field.len(),
            });
        }

        let mut kept: Vec<usize> = (0..field.len()).collect();
        let mut model = self.fit_subset(ctx, field, &kept)?;

        // One rejection pass: drop samples whose residual exceeds the
        // configured multiple of the residual spread, then refit.
        let survivors: Vec<usize> = kept
            .iter()
            .copied()
            .filter(|&i| {
                let smp = &field.samples[i];
                let (rg, az) = (smp.window_col as f64, smp.window_row as f64);
                let res_rg = smp.delta_range - model.eval_range(rg, az);
                let res_az = smp.delta_azimuth - model.eval_azimuth(rg, az);
                within_sigma(res_rg, model.range_residual_stdev, self.params.outlier_sigma)
                    && within_sigma(res_az, model.azimuth_residual_stdev, self.params.outlier_sigma)
            })
            .collect();

        if survivors.len() < kept.len() && survivors.len() >= needed {
            log::debug!(
                "Offset fit rejected {} outlier samples",
                kept.len() - survivors.len()
            );
            kept = survivors;
            model = self.fit_subset(ctx, field, &kept)?;
        }

        log::info!(
            "Polynomial fit over {} samples: residual stdev rg {:.4} / az {:.4} px",
            kept.len(),
            model.range_residual_stdev,
            model.azimuth_residual_stdev
        );
        Ok(model)
    }

    fn fit_subset(
        &self,
        ctx: &EngineContext,
        field: &OffsetField,
        indices: &[usize],
    ) -> CoregResult<PolynomialModel> {
        let ncoef = self.params.order.num_coeffs();
        let n = indices.len();

        let mut basis = Array2::zeros((n, ncoef));
        let mut rhs_rg = Array1::zeros(n);
        let mut rhs_az = Array1::zeros(n);
        let mut weights = Array1::zeros(n);
        for (row, &i) in indices.iter().enumerate() {
            let smp = &field.samples[i];
            let b = self
                .params
                .order
                .basis(smp.window_col as f64, smp.window_row as f64);
            for (col, v) in b.iter().enumerate() {
                basis[[row, col]] = *v;
            }
            rhs_rg[row] = smp.delta_range;
            rhs_az[row] = smp.delta_azimuth;
            weights[row] = match self.params.weight_mode {
                WeightMode::Snr => smp.snr,
                WeightMode::Uniform => 1.0,
            };
        }

        let coeffs_rg =
            ctx.kernel
                .fit_polynomial(basis.view(), rhs_rg.view(), weights.view())?;
        let coeffs_az =
            ctx.kernel
                .fit_polynomial(basis.view(), rhs_az.view(), weights.view())?;

        let mut model = PolynomialModel::zero();
        model.range_coeffs[..ncoef].copy_from_slice(&coeffs_rg);
        model.azimuth_coeffs[..ncoef].copy_from_slice(&coeffs_az);

        let rg_stdev = residual_stdev(field, indices, |smp| {
            smp.delta_range - model.eval_range(smp.window_col as f64, smp.window_row as f64)
        });
        let az_stdev = residual_stdev(field, indices, |smp| {
            smp.delta_azimuth - model.eval_azimuth(smp.window_col as f64, smp.window_row as f64)
        });
        model.range_residual_stdev = rg_stdev;
        model.azimuth_residual_stdev = az_stdev;
        Ok(model)
    }
}

fn within_sigma(residual: f64, stdev: f64, sigma: f64) -> bool {
    if stdev <= 0.0 {
        return true;
    }
    residual.abs() <= sigma * stdev
}

fn residual_stdev<F>(field: &OffsetField, indices: &[usize], residual: F) -> f64
where
    F: Fn(&crate::types::OffsetSample) -> f64,
{
    if indices.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = indices
        .iter()
        .map(|&i| residual(&field.samples[i]).powi(2))
        .sum();
    (sum_sq / indices.len() as f64).sqrt()
}
