use ndarray::{s, Array2, ArrayView2};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::core::context::EngineContext;
use crate::types::{
    Burst, BurstOverlap, CpxSample, LookupTable, OverlapStatistics, RasterMeta, SlcImage,
};

/// Burst overlap processing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstOverlapParams {
    /// Range looks for the double-difference multi-look (legacy 200)
    pub multilook_range: usize,
    /// Azimuth looks for the double-difference multi-look (legacy 4)
    pub multilook_azimuth: usize,
    /// Coherence mask threshold
    pub coherence_threshold: f64,
}

impl Default for BurstOverlapParams {
    fn default() -> Self {
        Self {
            multilook_range: 200,
            multilook_azimuth: 4,
            coherence_threshold: 0.8,
        }
    }
}

/// Burst timing decoded from the raster metadata. Both the fractional and
/// the rounded line offset are kept: geometry indexing uses the integer
/// form, timing keeps the fractional one.
pub fn derive_bursts(meta: &RasterMeta) -> Vec<Burst> {
    let n = meta.burst_start_times.len();
    let mut bursts = Vec::with_capacity(n);
    for i in 0..n {
        let fractional = if i + 1 < n {
            (meta.burst_start_times[i + 1] - meta.burst_start_times[i]) / meta.azimuth_line_time
        } else {
            meta.lines_per_burst as f64
        };
        bursts.push(Burst {
            start_time: meta.burst_start_times[i],
            lines_per_burst: meta.lines_per_burst,
            lines_offset_fractional: fractional,
            lines_offset_rounded: fractional.round() as i64,
        });
    }
    bursts
}

/// Overlap regions between adjacent bursts in the stacked raster, where
/// burst `i` occupies lines `i * lines_per_burst ..`. When a lookup table
/// is given, each strip is trimmed by the table's mean azimuth deviation in
/// that region, because refining the registration shifts the overlap
/// geometry slightly.
pub fn derive_overlaps(meta: &RasterMeta, lut: Option<&LookupTable>) -> Vec<BurstOverlap> {
    let bursts = derive_bursts(meta);
    let lpb = meta.lines_per_burst as i64;
    let total_lines = meta.azimuth_lines as i64;

    let mut overlaps = Vec::new();
    for i in 0..bursts.len().saturating_sub(1) {
        let offset = bursts[i].lines_offset_rounded;
        let mut num_lines = lpb - offset;
        if num_lines <= 0 {
            log::debug!("Bursts {} and {} do not overlap", i, i + 1);
            continue;
        }

        let later_start = (i as i64 + 1) * lpb;
        let earlier_start = later_start - num_lines;
        if later_start + num_lines > total_lines || earlier_start < 0 {
            num_lines = (total_lines - later_start).min(num_lines);
            if num_lines <= 0 {
                continue;
            }
        }

        if let Some(lut) = lut {
            let deviation = mean_azimuth_deviation(
                lut,
                earlier_start as usize,
                (later_start + num_lines) as usize,
            );
            let trim = deviation.abs().ceil() as i64;
            if trim > 0 {
                log::debug!(
                    "Trimming overlap {} by {} lines for lookup table deviation {:.3}",
                    i,
                    trim,
                    deviation
                );
            }
            num_lines -= trim;
            if num_lines <= 0 {
                continue;
            }
        }

        overlaps.push(BurstOverlap {
            range_start: 0,
            range_stop: meta.range_samples,
            azimuth_start_earlier: earlier_start as usize,
            azimuth_start_later: later_start as usize,
            num_lines: num_lines as usize,
        });
    }
    log::info!("Derived {} burst overlap regions", overlaps.len());
    overlaps
}

fn mean_azimuth_deviation(lut: &LookupTable, row_start: usize, row_stop: usize) -> f64 {
    let (rows, cols) = lut.dim();
    let stop = row_stop.min(rows);
    if row_start >= stop || cols == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in row_start..stop {
        for j in 0..cols {
            sum += (lut.azimuth[[i, j]] - i as f32) as f64;
            count += 1;
        }
    }
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

/// Per-overlap double-difference processor: forms the two single-look
/// interferograms of the shared ground strip, differences them to cancel
/// topographic and orbital phase, multi-looks, estimates coherence on the
/// unfiltered double difference (filtering first would bias the estimate
/// upward), filters, and extracts masked phase statistics.
pub struct BurstOverlapProcessor {
    params: BurstOverlapParams,
}

impl BurstOverlapProcessor {
    pub fn new(params: BurstOverlapParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BurstOverlapParams {
        &self.params
    }

    /// Process every overlap; the output order matches the input order.
    pub fn process_all(
        &self,
        ctx: &EngineContext,
        reference: ArrayView2<CpxSample>,
        secondary: ArrayView2<CpxSample>,
        overlaps: &[BurstOverlap],
    ) -> Vec<OverlapStatistics> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            overlaps
                .par_iter()
                .map(|ov| self.process_one(ctx, reference, secondary, ov))
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            overlaps
                .iter()
                .map(|ov| self.process_one(ctx, reference, secondary, ov))
                .collect()
        }
    }

    pub fn process_one(
        &self,
        ctx: &EngineContext,
        reference: ArrayView2<CpxSample>,
        secondary: ArrayView2<CpxSample>,
        overlap: &BurstOverlap,
    ) -> OverlapStatistics {
        let (rows, cols) = reference.dim();
        let n = overlap.num_lines;
        let rg0 = overlap.range_start;
        let rg1 = overlap.range_stop.min(cols);
        let ae = overlap.azimuth_start_earlier;
        let al = overlap.azimuth_start_later;

        if n == 0 || rg1 <= rg0 || ae + n > rows || al + n > rows || secondary.dim() != (rows, cols)
        {
            log::debug!("Degenerate overlap geometry {:?}", overlap);
            return OverlapStatistics::degenerate();
        }

        let ref_early = reference.slice(s![ae..ae + n, rg0..rg1]);
        let sec_early = secondary.slice(s![ae..ae + n, rg0..rg1]);
        let ref_late = reference.slice(s![al..al + n, rg0..rg1]);
        let sec_late = secondary.slice(s![al..al + n, rg0..rg1]);

        let ifg_early = ctx.kernel.interferogram(ref_early, sec_early);
        let ifg_late = ctx.kernel.interferogram(ref_late, sec_late);
        // double difference cancels phase common to both burst looks
        let dd = ctx.kernel.interferogram(ifg_early.view(), ifg_late.view());

        let az_looks = self.params.multilook_azimuth.clamp(1, n);
        let rg_looks = self.params.multilook_range.clamp(1, rg1 - rg0);
        let dd_ml = multilook(dd.view(), az_looks, rg_looks);
        let coherence = coherence_map(dd.view(), az_looks, rg_looks);

        if dd_ml.iter().all(|v| v.norm_sqr() == 0.0) {
            log::debug!("Overlap at line {} has no signal", al);
            return OverlapStatistics::degenerate();
        }

        let filtered = if ctx.capabilities.adaptive_filter {
            adaptive_filter(dd_ml.view(), coherence.view())
        } else {
            dd_ml
        };

        self.masked_statistics(ctx, filtered.view(), coherence.view())
    }

    fn masked_statistics(
        &self,
        ctx: &EngineContext,
        filtered: ArrayView2<CpxSample>,
        coherence: ArrayView2<f32>,
    ) -> OverlapStatistics {
        let total = filtered.len();
        if total == 0 {
            return OverlapStatistics::degenerate();
        }

        let coh_values: Vec<f64> = coherence
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| v as f64)
            .collect();
        let coh_valid = coherence
            .iter()
            .filter(|v| v.is_finite() && **v as f64 >= self.params.coherence_threshold)
            .count();
        let (coh_mean, coh_stdev) = mean_stdev(&coh_values);

        // phase is meaningful only inside the coherence mask
        let mut masked: Vec<CpxSample> = Vec::new();
        for (v, &c) in filtered.iter().zip(coherence.iter()) {
            if c.is_finite()
                && c as f64 >= self.params.coherence_threshold
                && v.norm_sqr() > 0.0
                && v.re.is_finite()
                && v.im.is_finite()
            {
                masked.push(*v);
            }
        }

        if masked.is_empty() {
            return OverlapStatistics {
                phase_mean: 0.0,
                phase_stdev: 0.0,
                phase_valid_fraction: 0.0,
                coherence_mean: coh_mean,
                coherence_stdev: coh_stdev,
                coherence_valid_fraction: coh_valid as f64 / total as f64,
            };
        }

        let phases: Vec<f64> = if ctx.capabilities.phase_unwrap {
            unwrap_about_mean(&masked)
        } else {
            masked.iter().map(|v| v.arg() as f64).collect()
        };
        let (phase_mean, phase_stdev) = mean_stdev(&phases);

        OverlapStatistics {
            phase_mean,
            phase_stdev,
            phase_valid_fraction: masked.len() as f64 / total as f64,
            coherence_mean: coh_mean,
            coherence_stdev: coh_stdev,
            coherence_valid_fraction: coh_valid as f64 / total as f64,
        }
    }
}

/// Complex multi-look: block average over `az_looks x rg_looks` cells.
pub fn multilook(data: ArrayView2<CpxSample>, az_looks: usize, rg_looks: usize) -> SlcImage {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((0, 0));
    }
    let az_looks = az_looks.max(1);
    let rg_looks = rg_looks.max(1);
    let out_rows = rows / az_looks;
    let out_cols = cols / rg_looks;
    let norm = (az_looks * rg_looks) as f32;
    Array2::from_shape_fn((out_rows.max(1).min(rows), out_cols.max(1).min(cols)), |(i, j)| {
        let mut acc = Complex::new(0.0f32, 0.0f32);
        for di in 0..az_looks {
            for dj in 0..rg_looks {
                let r = (i * az_looks + di).min(rows - 1);
                let c = (j * rg_looks + dj).min(cols - 1);
                acc += data[[r, c]];
            }
        }
        acc / norm
    })
}

/// Real-valued multi-look: block average of an intensity image.
pub fn multilook_real(data: ArrayView2<f32>, az_looks: usize, rg_looks: usize) -> Array2<f32> {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((0, 0));
    }
    let az_looks = az_looks.max(1);
    let rg_looks = rg_looks.max(1);
    let out_rows = (rows / az_looks).max(1).min(rows);
    let out_cols = (cols / rg_looks).max(1).min(cols);
    let norm = (az_looks * rg_looks) as f32;
    Array2::from_shape_fn((out_rows, out_cols), |(i, j)| {
        let mut acc = 0.0f32;
        for di in 0..az_looks {
            for dj in 0..rg_looks {
                let r = (i * az_looks + di).min(rows - 1);
                let c = (j * rg_looks + dj).min(cols - 1);
                acc += data[[r, c]];
            }
        }
        acc / norm
    })
}

/// Coherence of the complex samples inside each multi-look cell:
/// `|sum| / sum(|.|)`, 1.0 for perfectly aligned phases.
pub fn coherence_map(data: ArrayView2<CpxSample>, az_looks: usize, rg_looks: usize) -> Array2<f32> {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((0, 0));
    }
    let az_looks = az_looks.max(1);
    let rg_looks = rg_looks.max(1);
    let out_rows = (rows / az_looks).max(1).min(rows);
    let out_cols = (cols / rg_looks).max(1).min(cols);
    Array2::from_shape_fn((out_rows, out_cols), |(i, j)| {
        let mut acc = Complex::new(0.0f32, 0.0f32);
        let mut mag = 0.0f32;
        for di in 0..az_looks {
            for dj in 0..rg_looks {
                let r = (i * az_looks + di).min(rows - 1);
                let c = (j * rg_looks + dj).min(cols - 1);
                acc += data[[r, c]];
                mag += data[[r, c]].norm();
            }
        }
        if mag > 0.0 {
            acc.norm() / mag
        } else {
            0.0
        }
    })
}

/// Coherence-weighted 3x3 smoothing of the multi-looked double difference.
fn adaptive_filter(data: ArrayView2<CpxSample>, coherence: ArrayView2<f32>) -> SlcImage {
    let (rows, cols) = data.dim();
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let mut acc = Complex::new(0.0f32, 0.0f32);
        let mut wsum = 0.0f32;
        for di in -1i64..=1 {
            for dj in -1i64..=1 {
                let r = i as i64 + di;
                let c = j as i64 + dj;
                if r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64 {
                    continue;
                }
                let (r, c) = (r as usize, c as usize);
                let w = if coherence.dim() == (rows, cols) {
                    coherence[[r, c]].max(0.0)
                } else {
                    1.0
                };
                acc += data[[r, c]] * w;
                wsum += w;
            }
        }
        if wsum > 0.0 {
            acc / wsum
        } else {
            data[[i, j]]
        }
    })
}

/// Phases of the masked samples, wrapped into the interval centered on the
/// mean phase direction so the statistics are free of 2-pi jumps.
fn unwrap_about_mean(samples: &[CpxSample]) -> Vec<f64> {
    let mean: Complex<f64> = samples
        .iter()
        .map(|v| Complex::new(v.re as f64, v.im as f64))
        .sum();
    let center = if mean.norm() > 0.0 { mean.arg() } else { 0.0 };
    samples
        .iter()
        .map(|v| {
            let mut phi = v.arg() as f64 - center;
            while phi > std::f64::consts::PI {
                phi -= 2.0 * std::f64::consts::PI;
            }
            while phi < -std::f64::consts::PI {
                phi += 2.0 * std::f64::consts::PI;
            }
            phi + center
        })
        .collect()
}

fn mean_stdev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
