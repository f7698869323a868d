//! Scene products written to disk and read back into a working pipeline.

use ndarray::Array2;
use sarcoreg::io::{
    read_area_of_interest, read_cpx_raster, read_lookup_table, read_meta, read_real_raster,
    write_cpx_raster, write_lookup_table, write_meta, write_real_raster,
};
use sarcoreg::{CpxSample, LookupTable, Raster, RasterMeta};
use tempfile::tempdir;

#[test]
fn scene_products_roundtrip_through_files() {
    let dir = tempdir().unwrap();

    let mut meta = RasterMeta::with_dims(48, 96);
    meta.lines_per_burst = 48;
    meta.burst_start_times = vec![0.0, 0.08];
    meta.azimuth_looks = 4;
    meta.range_looks = 20;

    let slc = Array2::from_shape_fn((96, 48), |(i, j)| {
        CpxSample::new((i + 1) as f32 * 0.01, (j + 1) as f32 * -0.02)
    });
    let mli = slc.mapv(|v| v.norm_sqr());
    let lut = LookupTable::constant_shift(96, 48, 0.75, -1.25);

    write_meta(&dir.path().join("scene.par"), &meta).unwrap();
    write_cpx_raster(&dir.path().join("scene.slc"), &slc).unwrap();
    write_real_raster(&dir.path().join("scene.mli"), &mli).unwrap();
    write_lookup_table(&dir.path().join("pair.lut"), &lut).unwrap();

    let meta_back = read_meta(&dir.path().join("scene.par")).unwrap();
    assert_eq!(meta_back.range_samples, 48);
    assert_eq!(meta_back.azimuth_lines, 96);
    assert_eq!(meta_back.burst_start_times, meta.burst_start_times);

    let slc_back = read_cpx_raster(&dir.path().join("scene.slc"), &meta_back).unwrap();
    assert_eq!(slc_back, slc);

    let mli_back = read_real_raster(&dir.path().join("scene.mli"), &meta_back).unwrap();
    assert_eq!(mli_back, mli);

    let lut_back = read_lookup_table(&dir.path().join("pair.lut"), &meta_back).unwrap();
    assert_eq!(lut_back.range, lut.range);
    assert_eq!(lut_back.azimuth, lut.azimuth);

    // the raster read back still satisfies the shape validation
    assert!(Raster::new(slc_back, meta_back).is_ok());
}

#[test]
fn polygon_file_restricts_the_estimation_area() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aoi.txt");
    std::fs::write(&path, "8 16 1\n40 16 2\n40 80 3\n8 80 4\n").unwrap();

    let meta = RasterMeta::with_dims(48, 96);
    let aoi = read_area_of_interest(&path).unwrap();
    aoi.validate(&meta).unwrap();

    assert_eq!(aoi.range_start, 8);
    assert_eq!(aoi.range_stop, 40);
    assert_eq!(aoi.azimuth_start, 16);
    assert_eq!(aoi.azimuth_stop, 80);
}

#[test]
fn polygon_outside_the_raster_fails_validation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aoi.txt");
    std::fs::write(&path, "8 16 1\n400 16 2\n400 80 3\n8 80 4\n").unwrap();

    let meta = RasterMeta::with_dims(48, 96);
    let aoi = read_area_of_interest(&path).unwrap();
    assert!(aoi.validate(&meta).is_err());
}
