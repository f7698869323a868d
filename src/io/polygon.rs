//! Area-of-interest polygon files.
//!
//! One vertex per line as `range azimuth index` (whitespace separated,
//! trailing columns ignored). The bounding box of the vertices becomes the
//! estimation area.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::types::{AreaOfInterest, CoregError, CoregResult};

/// Parse a vertex file into the bounding-box area of interest.
pub fn read_area_of_interest(path: &Path) -> CoregResult<AreaOfInterest> {
    let mut contents = String::new();
    BufReader::new(File::open(path)?).read_to_string(&mut contents)?;
    parse_area_of_interest(&contents)
        .map_err(|e| CoregError::InvalidFormat(format!("{}: {}", path.display(), e)))
}

fn parse_area_of_interest(contents: &str) -> Result<AreaOfInterest, String> {
    let mut vertices = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let range = parse_coord(fields.next(), lineno)?;
        let azimuth = parse_coord(fields.next(), lineno)?;
        vertices.push((range, azimuth));
    }
    if vertices.len() < 3 {
        return Err(format!(
            "need at least 3 vertices, found {}",
            vertices.len()
        ));
    }

    let range_start = vertices.iter().map(|v| v.0).min().unwrap_or(0);
    let range_stop = vertices.iter().map(|v| v.0).max().unwrap_or(0);
    let azimuth_start = vertices.iter().map(|v| v.1).min().unwrap_or(0);
    let azimuth_stop = vertices.iter().map(|v| v.1).max().unwrap_or(0);
    Ok(AreaOfInterest {
        range_start,
        range_stop,
        azimuth_start,
        azimuth_stop,
    })
}

fn parse_coord(field: Option<&str>, lineno: usize) -> Result<usize, String> {
    let raw = field.ok_or_else(|| format!("line {}: missing coordinate", lineno + 1))?;
    // vertex coordinates may be written with a fractional part
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("line {}: invalid coordinate '{}'", lineno + 1, raw))?;
    if value < 0.0 {
        return Err(format!("line {}: negative coordinate '{}'", lineno + 1, raw));
    }
    Ok(value.floor() as usize)
}
