//! Flat binary raster and lookup table I/O.
//!
//! Rasters are row-major little-endian float32 (interleaved real/imaginary
//! pairs for complex data); lookup tables interleave the range and azimuth
//! coordinate per entry. Dimensions come from the `key: value` metadata
//! block stored next to the data.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::Array2;

use crate::types::{
    CoregError, CoregResult, CpxSample, LookupTable, RasterMeta, RealImage, SlcImage,
};

fn read_f32_values(path: &Path, expected: usize) -> CoregResult<Vec<f32>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    if bytes.len() != expected * 4 {
        return Err(CoregError::InvalidFormat(format!(
            "{}: expected {} float32 values ({} bytes), found {} bytes",
            path.display(),
            expected,
            expected * 4,
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn write_f32_values<'a, I>(path: &Path, values: I) -> CoregResult<()>
where
    I: Iterator<Item = &'a f32>,
{
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a real float32 raster of known dimensions.
pub fn read_real_raster(path: &Path, meta: &RasterMeta) -> CoregResult<RealImage> {
    let n = meta.range_samples * meta.azimuth_lines;
    let values = read_f32_values(path, n)?;
    Array2::from_shape_vec((meta.azimuth_lines, meta.range_samples), values)
        .map_err(|e| CoregError::InvalidFormat(format!("{}: {}", path.display(), e)))
}

pub fn write_real_raster(path: &Path, data: &RealImage) -> CoregResult<()> {
    write_f32_values(path, data.iter())
}

/// Read a complex float32 raster (interleaved real/imaginary).
pub fn read_cpx_raster(path: &Path, meta: &RasterMeta) -> CoregResult<SlcImage> {
    let n = meta.range_samples * meta.azimuth_lines;
    let values = read_f32_values(path, n * 2)?;
    let samples: Vec<CpxSample> = values
        .chunks_exact(2)
        .map(|p| CpxSample::new(p[0], p[1]))
        .collect();
    Array2::from_shape_vec((meta.azimuth_lines, meta.range_samples), samples)
        .map_err(|e| CoregError::InvalidFormat(format!("{}: {}", path.display(), e)))
}

pub fn write_cpx_raster(path: &Path, data: &SlcImage) -> CoregResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for v in data.iter() {
        writer.write_all(&v.re.to_le_bytes())?;
        writer.write_all(&v.im.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a lookup table (interleaved range/azimuth coordinate per entry),
/// dimensioned to the reference grid described by `meta`.
pub fn read_lookup_table(path: &Path, meta: &RasterMeta) -> CoregResult<LookupTable> {
    let n = meta.range_samples * meta.azimuth_lines;
    let values = read_f32_values(path, n * 2)?;
    let mut range = Array2::zeros((meta.azimuth_lines, meta.range_samples));
    let mut azimuth = Array2::zeros((meta.azimuth_lines, meta.range_samples));
    for (idx, pair) in values.chunks_exact(2).enumerate() {
        let i = idx / meta.range_samples;
        let j = idx % meta.range_samples;
        range[[i, j]] = pair[0];
        azimuth[[i, j]] = pair[1];
    }
    LookupTable::new(range, azimuth)
}

pub fn write_lookup_table(path: &Path, lut: &LookupTable) -> CoregResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for (rg, az) in lut.range.iter().zip(lut.azimuth.iter()) {
        writer.write_all(&rg.to_le_bytes())?;
        writer.write_all(&az.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

fn missing(key: &str, path: &Path) -> CoregError {
    CoregError::InvalidFormat(format!("{}: missing key '{}'", path.display(), key))
}

fn parse_value<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    key: &str,
    path: &Path,
) -> CoregResult<T> {
    let raw = map.get(key).ok_or_else(|| missing(key, path))?;
    raw.parse().map_err(|_| {
        CoregError::InvalidFormat(format!(
            "{}: cannot parse '{}' for key '{}'",
            path.display(),
            raw,
            key
        ))
    })
}

/// Parse a `key: value` metadata block.
pub fn read_meta(path: &Path) -> CoregResult<RasterMeta> {
    let mut contents = String::new();
    BufReader::new(File::open(path)?).read_to_string(&mut contents)?;

    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    let burst_start_times = map
        .get("burst_start_times")
        .ok_or_else(|| missing("burst_start_times", path))?
        .split_whitespace()
        .map(|v| {
            v.parse::<f64>().map_err(|_| {
                CoregError::InvalidFormat(format!(
                    "{}: invalid burst start time '{}'",
                    path.display(),
                    v
                ))
            })
        })
        .collect::<CoregResult<Vec<f64>>>()?;

    Ok(RasterMeta {
        range_samples: parse_value(&map, "range_samples", path)?,
        azimuth_lines: parse_value(&map, "azimuth_lines", path)?,
        range_looks: parse_value(&map, "range_looks", path)?,
        azimuth_looks: parse_value(&map, "azimuth_looks", path)?,
        azimuth_line_time: parse_value(&map, "azimuth_line_time", path)?,
        range_pixel_spacing: parse_value(&map, "range_pixel_spacing", path)?,
        lines_per_burst: parse_value(&map, "lines_per_burst", path)?,
        burst_start_times,
        doppler_centroid_rate_diff: parse_value(&map, "doppler_centroid_rate_diff", path)?,
    })
}

pub fn write_meta(path: &Path, meta: &RasterMeta) -> CoregResult<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    writeln!(w, "range_samples: {}", meta.range_samples)?;
    writeln!(w, "azimuth_lines: {}", meta.azimuth_lines)?;
    writeln!(w, "range_looks: {}", meta.range_looks)?;
    writeln!(w, "azimuth_looks: {}", meta.azimuth_looks)?;
    writeln!(w, "azimuth_line_time: {:e}", meta.azimuth_line_time)?;
    writeln!(w, "range_pixel_spacing: {}", meta.range_pixel_spacing)?;
    writeln!(w, "lines_per_burst: {}", meta.lines_per_burst)?;
    let times: Vec<String> = meta
        .burst_start_times
        .iter()
        .map(|t| format!("{:.9}", t))
        .collect();
    writeln!(w, "burst_start_times: {}", times.join(" "))?;
    writeln!(
        w,
        "doppler_centroid_rate_diff: {}",
        meta.doppler_centroid_rate_diff
    )?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    #[test]
    fn real_raster_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scene.mli");
        let meta = RasterMeta::with_dims(5, 4);
        let data = Array2::from_shape_fn((4, 5), |(i, j)| (i * 5 + j) as f32 * 0.5);

        write_real_raster(&path, &data).unwrap();
        let back = read_real_raster(&path, &meta).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn cpx_raster_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scene.slc");
        let meta = RasterMeta::with_dims(3, 3);
        let data = Array2::from_shape_fn((3, 3), |(i, j)| {
            CpxSample::new(i as f32, -(j as f32))
        });

        write_cpx_raster(&path, &data).unwrap();
        let back = read_cpx_raster(&path, &meta).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn lookup_table_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pair.lut");
        let meta = RasterMeta::with_dims(6, 4);
        let lut = LookupTable::constant_shift(4, 6, 1.25, -0.5);

        write_lookup_table(&path, &lut).unwrap();
        let back = read_lookup_table(&path, &meta).unwrap();
        assert_eq!(back.range, lut.range);
        assert_eq!(back.azimuth, lut.azimuth);
    }

    #[test]
    fn truncated_raster_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.mli");
        std::fs::write(&path, [0u8; 10]).unwrap();
        let meta = RasterMeta::with_dims(5, 4);
        assert!(matches!(
            read_real_raster(&path, &meta),
            Err(CoregError::InvalidFormat(_))
        ));
    }

    #[test]
    fn meta_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scene.par");
        let mut meta = RasterMeta::with_dims(100, 300);
        meta.lines_per_burst = 150;
        meta.burst_start_times = vec![0.0, 0.27];
        meta.azimuth_looks = 4;

        write_meta(&path, &meta).unwrap();
        let back = read_meta(&path).unwrap();
        assert_eq!(back.range_samples, 100);
        assert_eq!(back.azimuth_lines, 300);
        assert_eq!(back.azimuth_looks, 4);
        assert_eq!(back.lines_per_burst, 150);
        assert_eq!(back.burst_start_times.len(), 2);
        assert_abs_diff_eq!(back.burst_start_times[1], 0.27, epsilon = 1e-9);
        assert_abs_diff_eq!(back.azimuth_line_time, meta.azimuth_line_time, epsilon = 1e-12);
    }

    #[test]
    fn meta_missing_key_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.par");
        std::fs::write(&path, "range_samples: 10\n").unwrap();
        assert!(matches!(read_meta(&path), Err(CoregError::InvalidFormat(_))));
    }
}
