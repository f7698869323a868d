//! Quality report persistence.
//!
//! Reports are written as `key: value` text so they stay grep-able next to
//! the binary products. One `azimuth_pixel_offset` line is emitted per
//! refinement iteration; re-scanning those lines is how a finished run is
//! re-checked for the degenerate zero-offset condition without keeping the
//! engine output around.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::types::{
    CoregError, CoregResult, IterationRecord, OverlapStatistics, QualityReport, RefinementStage,
};

pub fn write_report(path: &Path, report: &QualityReport) -> CoregResult<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    writeln!(w, "generated: {}", report.generated)?;
    writeln!(w, "snr_threshold: {}", report.snr_threshold)?;
    writeln!(w, "coherence_threshold: {}", report.coherence_threshold)?;
    writeln!(w, "fraction_threshold: {}", report.fraction_threshold)?;
    writeln!(w, "phase_stdev_threshold: {}", report.phase_stdev_threshold)?;
    writeln!(w, "initial_offset_sum: {}", report.initial_offset_sum)?;
    writeln!(w, "range_residual_stdev: {}", report.range_residual_stdev)?;
    writeln!(
        w,
        "azimuth_residual_stdev: {}",
        report.azimuth_residual_stdev
    )?;
    writeln!(
        w,
        "final_overlap_average: {}",
        report.final_overlap_average
    )?;
    writeln!(
        w,
        "did_not_converge: {}",
        if report.did_not_converge { 1 } else { 0 }
    )?;
    writeln!(
        w,
        "fit_aborted: {}",
        if report.fit_aborted { 1 } else { 0 }
    )?;

    for rec in &report.iterations {
        writeln!(w, "iteration: {} {}", rec.stage, rec.iteration)?;
        writeln!(w, "range_pixel_offset: {}", rec.range_correction)?;
        writeln!(w, "azimuth_pixel_offset: {}", rec.azimuth_correction)?;
    }
    for stats in &report.overlap_stats {
        writeln!(
            w,
            "overlap_stats: {} {} {} {} {} {}",
            stats.phase_mean,
            stats.phase_stdev,
            stats.phase_valid_fraction,
            stats.coherence_mean,
            stats.coherence_stdev,
            stats.coherence_valid_fraction
        )?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_report(path: &Path) -> CoregResult<QualityReport> {
    let mut contents = String::new();
    BufReader::new(File::open(path)?).read_to_string(&mut contents)?;
    parse_report(&contents)
        .map_err(|e| CoregError::InvalidFormat(format!("{}: {}", path.display(), e)))
}

fn parse_report(contents: &str) -> Result<QualityReport, String> {
    let mut report = QualityReport::new();

    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| format!("line {}: not a key: value pair", lineno + 1))?;
        let (key, value) = (key.trim(), value.trim());

        match key {
            "generated" => report.generated = value.to_string(),
            "snr_threshold" => report.snr_threshold = parse_f64(value, key, lineno)?,
            "coherence_threshold" => report.coherence_threshold = parse_f64(value, key, lineno)?,
            "fraction_threshold" => report.fraction_threshold = parse_f64(value, key, lineno)?,
            "phase_stdev_threshold" => {
                report.phase_stdev_threshold = parse_f64(value, key, lineno)?
            }
            "initial_offset_sum" => report.initial_offset_sum = parse_f64(value, key, lineno)?,
            "range_residual_stdev" => report.range_residual_stdev = parse_f64(value, key, lineno)?,
            "azimuth_residual_stdev" => {
                report.azimuth_residual_stdev = parse_f64(value, key, lineno)?
            }
            "final_overlap_average" => {
                report.final_overlap_average = parse_f64(value, key, lineno)?
            }
            "did_not_converge" => report.did_not_converge = value != "0",
            "fit_aborted" => report.fit_aborted = value != "0",
            "iteration" => {
                let mut fields = value.split_whitespace();
                let stage = match fields.next() {
                    Some("intensity") => RefinementStage::Intensity,
                    Some("spectral_diversity") => RefinementStage::SpectralDiversity,
                    other => {
                        return Err(format!(
                            "line {}: unknown stage '{}'",
                            lineno + 1,
                            other.unwrap_or("")
                        ))
                    }
                };
                let iteration = fields
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| format!("line {}: missing iteration number", lineno + 1))?;
                report.iterations.push(IterationRecord {
                    stage,
                    iteration,
                    range_correction: 0.0,
                    azimuth_correction: 0.0,
                });
            }
            "range_pixel_offset" => {
                let rec = report
                    .iterations
                    .last_mut()
                    .ok_or_else(|| format!("line {}: offset before any iteration", lineno + 1))?;
                rec.range_correction = parse_f64(value, key, lineno)?;
            }
            "azimuth_pixel_offset" => {
                let rec = report
                    .iterations
                    .last_mut()
                    .ok_or_else(|| format!("line {}: offset before any iteration", lineno + 1))?;
                rec.azimuth_correction = parse_f64(value, key, lineno)?;
            }
            "overlap_stats" => {
                let fields: Vec<f64> = value
                    .split_whitespace()
                    .map(|v| v.parse())
                    .collect::<Result<_, _>>()
                    .map_err(|_| format!("line {}: invalid overlap statistics", lineno + 1))?;
                if fields.len() != 6 {
                    return Err(format!(
                        "line {}: expected 6 overlap statistics, found {}",
                        lineno + 1,
                        fields.len()
                    ));
                }
                report.overlap_stats.push(OverlapStatistics {
                    phase_mean: fields[0],
                    phase_stdev: fields[1],
                    phase_valid_fraction: fields[2],
                    coherence_mean: fields[3],
                    coherence_stdev: fields[4],
                    coherence_valid_fraction: fields[5],
                });
            }
            _ => {
                // unknown keys are tolerated so reports stay forward compatible
                log::debug!("quality report: ignoring key '{}'", key);
            }
        }
    }
    Ok(report)
}

fn parse_f64(value: &str, key: &str, lineno: usize) -> Result<f64, String> {
    value
        .parse()
        .map_err(|_| format!("line {}: invalid value '{}' for '{}'", lineno + 1, value, key))
}

/// Scan a written report for the summed per-iteration azimuth offsets.
/// Returns the sum; a magnitude inside `tolerance` marks a run whose
/// registration never measured a real offset.
pub fn scan_azimuth_offset_sum(path: &Path) -> CoregResult<f64> {
    let mut contents = String::new();
    BufReader::new(File::open(path)?).read_to_string(&mut contents)?;

    let mut sum = 0.0;
    let mut seen = false;
    for line in contents.lines() {
        if let Some(value) = line.trim().strip_prefix("azimuth_pixel_offset:") {
            sum += value.trim().parse::<f64>().map_err(|_| {
                CoregError::InvalidFormat(format!(
                    "{}: invalid azimuth_pixel_offset '{}'",
                    path.display(),
                    value.trim()
                ))
            })?;
            seen = true;
        }
    }
    if !seen {
        return Err(CoregError::InvalidFormat(format!(
            "{}: no azimuth_pixel_offset lines",
            path.display()
        )));
    }
    Ok(sum)
}

/// Re-check a finished run from its report file alone.
pub fn check_quality(path: &Path, tolerance: f64) -> CoregResult<bool> {
    let sum = scan_azimuth_offset_sum(path)?;
    log::info!("Sum of azimuth offsets in {}: {}", path.display(), sum);
    Ok(sum.abs() > tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn sample_report() -> QualityReport {
        let mut report = QualityReport::new();
        report.generated = "2024-05-01 10:00:00 UTC".to_string();
        report.snr_threshold = 7.0;
        report.coherence_threshold = 0.8;
        report.fraction_threshold = 0.01;
        report.phase_stdev_threshold = 0.8;
        report.initial_offset_sum = 1.75;
        report.range_residual_stdev = 0.02;
        report.azimuth_residual_stdev = 0.015;
        report.final_overlap_average = -0.003;
        report.did_not_converge = false;
        report.fit_aborted = true;
        report.iterations = vec![
            IterationRecord {
                stage: RefinementStage::Intensity,
                iteration: 1,
                range_correction: 0.5,
                azimuth_correction: -0.25,
            },
            IterationRecord {
                stage: RefinementStage::SpectralDiversity,
                iteration: 1,
                range_correction: 0.0,
                azimuth_correction: 0.001,
            },
        ];
        report.overlap_stats = vec![OverlapStatistics {
            phase_mean: -0.01,
            phase_stdev: 0.2,
            phase_valid_fraction: 0.9,
            coherence_mean: 0.92,
            coherence_stdev: 0.03,
            coherence_valid_fraction: 0.95,
        }];
        report
    }

    #[test]
    fn report_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pair.qual");
        let report = sample_report();

        write_report(&path, &report).unwrap();
        let back = read_report(&path).unwrap();

        assert_eq!(back.generated, report.generated);
        assert_abs_diff_eq!(back.snr_threshold, 7.0);
        assert_abs_diff_eq!(back.initial_offset_sum, 1.75);
        assert!(!back.did_not_converge);
        assert!(back.fit_aborted);
        assert_eq!(back.iterations.len(), 2);
        assert_eq!(back.iterations[0].stage, RefinementStage::Intensity);
        assert_abs_diff_eq!(back.iterations[0].azimuth_correction, -0.25);
        assert_eq!(
            back.iterations[1].stage,
            RefinementStage::SpectralDiversity
        );
        assert_eq!(back.overlap_stats.len(), 1);
        assert_abs_diff_eq!(back.overlap_stats[0].coherence_mean, 0.92);
    }

    #[test]
    fn offset_sum_is_scanned_from_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pair.qual");
        write_report(&path, &sample_report()).unwrap();

        let sum = scan_azimuth_offset_sum(&path).unwrap();
        assert_abs_diff_eq!(sum, -0.249, epsilon = 1e-12);
        assert!(check_quality(&path, 1e-9).unwrap());
    }

    #[test]
    fn zero_offsets_fail_the_quality_check() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pair.qual");
        std::fs::write(
            &path,
            "azimuth_pixel_offset: 0.5\nazimuth_pixel_offset: -0.5\n",
        )
        .unwrap();
        assert!(!check_quality(&path, 1e-9).unwrap());
    }

    #[test]
    fn report_without_offsets_is_invalid_for_scanning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.qual");
        std::fs::write(&path, "did_not_converge: 0\n").unwrap();
        assert!(matches!(
            scan_azimuth_offset_sum(&path),
            Err(CoregError::InvalidFormat(_))
        ));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("forward.qual");
        std::fs::write(
            &path,
            "snr_threshold: 6.5\nfuture_key: whatever\ndid_not_converge: 1\n",
        )
        .unwrap();
        let report = read_report(&path).unwrap();
        assert_abs_diff_eq!(report.snr_threshold, 6.5);
        assert!(report.did_not_converge);
    }
}
