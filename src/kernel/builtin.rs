use ndarray::{Array2, ArrayView1, ArrayView2};
use num_complex::Complex;
use num_traits::Zero;
use rustfft::FftPlanner;

use super::{CorrelationPeak, KernelCapabilities, NumericKernel};
use crate::types::{CoregError, CoregResult, CpxSample, LookupTable, RealImage, SlcImage};

type Cpx64 = Complex<f64>;

/// Default numeric backend: FFT cross-correlation with frequency-domain
/// oversampling, normal-equations weighted least squares and bilinear
/// lookup-table resampling.
#[derive(Debug, Default)]
pub struct BuiltinKernel;

impl BuiltinKernel {
    pub fn new() -> Self {
        Self
    }
}

/// In-place 2D FFT, rows then columns. The inverse transform is normalized
/// by `1 / (rows * cols)` so a forward/inverse pair is the identity.
fn fft2(data: &mut Array2<Cpx64>, inverse: bool) {
    let (rows, cols) = data.dim();
    let mut planner = FftPlanner::new();

    let row_fft = if inverse {
        planner.plan_fft_inverse(cols)
    } else {
        planner.plan_fft_forward(cols)
    };
    let mut buf = vec![Cpx64::zero(); cols];
    for mut row in data.rows_mut() {
        for (b, v) in buf.iter_mut().zip(row.iter()) {
            *b = *v;
        }
        row_fft.process(&mut buf);
        for (v, b) in row.iter_mut().zip(buf.iter()) {
            *v = *b;
        }
    }

    let col_fft = if inverse {
        planner.plan_fft_inverse(rows)
    } else {
        planner.plan_fft_forward(rows)
    };
    let mut buf = vec![Cpx64::zero(); rows];
    for mut col in data.columns_mut() {
        for (b, v) in buf.iter_mut().zip(col.iter()) {
            *b = *v;
        }
        col_fft.process(&mut buf);
        for (v, b) in col.iter_mut().zip(buf.iter()) {
            *v = *b;
        }
    }

    if inverse {
        let norm = 1.0 / (rows * cols) as f64;
        data.mapv_inplace(|v| v * norm);
    }
}

/// Wrap a padded-array index into a signed circular lag.
fn wrapped_lag(index: usize, len: usize) -> i64 {
    if index <= len / 2 {
        index as i64
    } else {
        index as i64 - len as i64
    }
}

/// Chebyshev distance between two indices on a circular axis.
fn circular_distance(a: usize, b: usize, len: usize) -> usize {
    let d = if a > b { a - b } else { b - a };
    d.min(len - d)
}

/// Sub-sample peak offset from a 1D quadratic fit through three samples.
fn quadratic_peak_offset(left: f64, center: f64, right: f64) -> f64 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    let offset = 0.5 * (left - right) / denom;
    offset.clamp(-0.5, 0.5)
}

/// Solve a small dense linear system by Gaussian elimination with partial
/// pivoting. Returns `None` when the matrix is singular to working
/// precision.
fn solve_dense(mut a: Array2<f64>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let mut pivot = col;
        for row in (col + 1)..n {
            if a[[row, col]].abs() > a[[pivot, col]].abs() {
                pivot = row;
            }
        }
        if a[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                let tmp = a[[col, k]];
                a[[col, k]] = a[[pivot, k]];
                a[[pivot, k]] = tmp;
            }
            b.swap(col, pivot);
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in (row + 1)..n {
            sum -= a[[row, k]] * x[k];
        }
        x[row] = sum / a[[row, row]];
    }
    Some(x)
}

/// Bilinear interpolation at a fractional `(azimuth, range)` coordinate.
/// Coordinates outside the grid yield zero.
fn bilinear<T>(data: &ArrayView2<T>, az: f32, rg: f32) -> T
where
    T: Copy + Zero + std::ops::Add<Output = T> + std::ops::Mul<f32, Output = T>,
{
    let (rows, cols) = data.dim();
    if !az.is_finite() || !rg.is_finite() {
        return T::zero();
    }
    if az < 0.0 || rg < 0.0 || az > (rows - 1) as f32 || rg > (cols - 1) as f32 {
        return T::zero();
    }
    let i0 = az.floor() as usize;
    let j0 = rg.floor() as usize;
    let i1 = (i0 + 1).min(rows - 1);
    let j1 = (j0 + 1).min(cols - 1);
    let fa = az - i0 as f32;
    let fr = rg - j0 as f32;

    data[[i0, j0]] * ((1.0 - fa) * (1.0 - fr))
        + data[[i0, j1]] * ((1.0 - fa) * fr)
        + data[[i1, j0]] * (fa * (1.0 - fr))
        + data[[i1, j1]] * (fa * fr)
}

// Peak-neighborhood exclusion radius (in coarse pixels) for the SNR and
// ambiguity estimates.
const PEAK_EXCLUSION: usize = 3;

// A secondary maximum this close to the main peak marks the window as
// ambiguous.
const AMBIGUITY_RATIO: f64 = 0.9;

impl NumericKernel for BuiltinKernel {
    fn correlate(
        &self,
        reference: ArrayView2<f32>,
        secondary: ArrayView2<f32>,
        oversample: usize,
    ) -> Option<CorrelationPeak> {
        let (rows, cols) = reference.dim();
        if secondary.dim() != (rows, cols) || rows < 8 || cols < 8 {
            return None;
        }
        let oversample = oversample.max(1);
        let n = (rows * cols) as f64;

        let mean_a = reference.iter().map(|&v| v as f64).sum::<f64>() / n;
        let mean_b = secondary.iter().map(|&v| v as f64).sum::<f64>() / n;
        let energy_a: f64 = reference.iter().map(|&v| (v as f64 - mean_a).powi(2)).sum();
        let energy_b: f64 = secondary.iter().map(|&v| (v as f64 - mean_b).powi(2)).sum();
        if energy_a <= 1e-12 || energy_b <= 1e-12 {
            // flat window, no texture to correlate
            return None;
        }
        let norm = (energy_a * energy_b).sqrt();

        let mut fa = Array2::from_shape_fn((rows, cols), |(i, j)| {
            Cpx64::new(reference[[i, j]] as f64 - mean_a, 0.0)
        });
        let mut fb = Array2::from_shape_fn((rows, cols), |(i, j)| {
            Cpx64::new(secondary[[i, j]] as f64 - mean_b, 0.0)
        });
        fft2(&mut fa, false);
        fft2(&mut fb, false);

        // Cross-power spectrum conj(F_ref) * F_sec: the correlation surface
        // then peaks at the shift of the secondary relative to the reference.
        let cross = Array2::from_shape_fn((rows, cols), |(i, j)| {
            fa[[i, j]].conj() * fb[[i, j]] / norm
        });

        // Frequency-domain zero padding oversamples the correlation surface.
        let (prows, pcols) = (rows * oversample, cols * oversample);
        let mut padded = Array2::zeros((prows, pcols));
        for k1 in 0..rows {
            let t1 = if k1 <= rows / 2 { k1 } else { prows - (rows - k1) };
            for k2 in 0..cols {
                let t2 = if k2 <= cols / 2 { k2 } else { pcols - (cols - k2) };
                padded[[t1, t2]] = cross[[k1, k2]];
            }
        }
        fft2(&mut padded, true);

        // Peak search limited to a quarter-window lag in either direction;
        // larger shifts alias on the circular correlation surface.
        let max_az = (rows / 4 * oversample) as i64;
        let max_rg = (cols / 4 * oversample) as i64;
        let mut peak = 0.0f64;
        let mut peak_idx = (0usize, 0usize);
        for i in 0..prows {
            let lag_az = wrapped_lag(i, prows);
            if lag_az.abs() > max_az {
                continue;
            }
            for j in 0..pcols {
                let lag_rg = wrapped_lag(j, pcols);
                if lag_rg.abs() > max_rg {
                    continue;
                }
                let mag = padded[[i, j]].norm();
                if mag > peak {
                    peak = mag;
                    peak_idx = (i, j);
                }
            }
        }
        if peak <= 0.0 || !peak.is_finite() {
            return None;
        }

        // Second maximum and noise floor outside the peak neighborhood.
        let exclusion = PEAK_EXCLUSION * oversample;
        let mut second = 0.0f64;
        let mut noise_sum = 0.0f64;
        let mut noise_count = 0usize;
        for i in 0..prows {
            for j in 0..pcols {
                if circular_distance(i, peak_idx.0, prows) <= exclusion
                    && circular_distance(j, peak_idx.1, pcols) <= exclusion
                {
                    continue;
                }
                let mag = padded[[i, j]].norm();
                noise_sum += mag;
                noise_count += 1;
                if mag > second {
                    second = mag;
                }
            }
        }
        if noise_count == 0 {
            return None;
        }
        if second >= AMBIGUITY_RATIO * peak {
            // competing maximum, peak is not unique
            return None;
        }
        let noise_mean = noise_sum / noise_count as f64;
        let snr = if noise_mean > 0.0 { peak / noise_mean } else { 0.0 };

        // Quadratic sub-sample refinement on the oversampled surface.
        let (pi, pj) = peak_idx;
        let up = padded[[(pi + prows - 1) % prows, pj]].norm();
        let down = padded[[(pi + 1) % prows, pj]].norm();
        let left = padded[[pi, (pj + pcols - 1) % pcols]].norm();
        let right = padded[[pi, (pj + 1) % pcols]].norm();
        let sub_az = quadratic_peak_offset(up, peak, down);
        let sub_rg = quadratic_peak_offset(left, peak, right);

        let delta_azimuth =
            (wrapped_lag(pi, prows) as f64 + sub_az) / oversample as f64;
        let delta_range = (wrapped_lag(pj, pcols) as f64 + sub_rg) / oversample as f64;

        Some(CorrelationPeak {
            delta_range,
            delta_azimuth,
            snr,
        })
    }

    fn interferogram(
        &self,
        earlier: ArrayView2<CpxSample>,
        later: ArrayView2<CpxSample>,
    ) -> SlcImage {
        Array2::from_shape_fn(earlier.dim(), |(i, j)| earlier[[i, j]] * later[[i, j]].conj())
    }

    fn fit_polynomial(
        &self,
        basis: ArrayView2<f64>,
        rhs: ArrayView1<f64>,
        weights: ArrayView1<f64>,
    ) -> CoregResult<Vec<f64>> {
        let (n, m) = basis.dim();
        if rhs.len() != n || weights.len() != n {
            return Err(CoregError::Processing(format!(
                "least-squares dimensions disagree: {} rows, {} rhs, {} weights",
                n,
                rhs.len(),
                weights.len()
            )));
        }
        if n < m {
            return Err(CoregError::InsufficientSamples { needed: m, got: n });
        }

        // Weighted normal equations A'WA x = A'Wb.
        let mut ata = Array2::zeros((m, m));
        let mut atb = vec![0.0; m];
        for row in 0..n {
            let w = weights[row];
            for i in 0..m {
                let wai = w * basis[[row, i]];
                atb[i] += wai * rhs[row];
                for j in i..m {
                    ata[[i, j]] += wai * basis[[row, j]];
                }
            }
        }
        for i in 0..m {
            for j in 0..i {
                ata[[i, j]] = ata[[j, i]];
            }
        }

        solve_dense(ata, atb).ok_or_else(|| {
            CoregError::Processing("normal equations are singular; offset field is degenerate".into())
        })
    }

    fn resample_slc(&self, data: ArrayView2<CpxSample>, lut: &LookupTable) -> SlcImage {
        Array2::from_shape_fn(lut.dim(), |(i, j)| {
            bilinear(&data, lut.azimuth[[i, j]], lut.range[[i, j]])
        })
    }

    fn resample_real(&self, data: ArrayView2<f32>, lut: &LookupTable) -> RealImage {
        Array2::from_shape_fn(lut.dim(), |(i, j)| {
            bilinear(&data, lut.azimuth[[i, j]], lut.range[[i, j]])
        })
    }

    fn capabilities(&self) -> KernelCapabilities {
        KernelCapabilities::default()
    }
}
