//! File formats of the refinement pipeline: flat binary rasters and lookup
//! tables, `key: value` metadata and quality reports, vertex polygons.

pub mod polygon;
pub mod raster;
pub mod report;

pub use polygon::read_area_of_interest;
pub use raster::{
    read_cpx_raster, read_lookup_table, read_meta, read_real_raster, write_cpx_raster,
    write_lookup_table, write_meta, write_real_raster,
};
pub use report::{check_quality, read_report, scan_azimuth_offset_sum, write_report};
