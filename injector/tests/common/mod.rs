//! Fixtures shared by the integration tests

#![allow(dead_code)]

use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use injector::io::write_segmentation;
use ndarray::Array2;
use std::path::{Path, PathBuf};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write `data` (in `[w, y, x]` or `[y, x]` order) to the primary HDU
pub fn write_single_plane(path: &Path, shape: &[usize], data: &[f64]) {
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: shape,
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()
        .unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.write_key(&mut fptr, "OBJECT", "test-field").unwrap();
    hdu.write_image(&mut fptr, data).unwrap();
}

/// Write an empty primary HDU with DATA in HDU 1 and STAT in HDU 2
pub fn write_data_plus_variance(path: &Path, shape: &[usize], data: &[f64], variance: &[f64]) {
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: shape,
    };
    let mut fptr = FitsFile::create(path).overwrite().open().unwrap();
    let primary = fptr.primary_hdu().unwrap();
    primary.write_key(&mut fptr, "OBJECT", "test-field").unwrap();

    let hdu = fptr.create_image("DATA", &description).unwrap();
    hdu.write_image(&mut fptr, data).unwrap();
    let hdu = fptr.create_image("STAT", &description).unwrap();
    hdu.write_image(&mut fptr, variance).unwrap();
}

pub fn read_object(path: &Path) -> String {
    let mut fptr = FitsFile::open(path).unwrap();
    let primary = fptr.primary_hdu().unwrap();
    primary.read_key(&mut fptr, "OBJECT").unwrap()
}

pub fn read_hdu(path: &Path, index: usize) -> Vec<f64> {
    let mut fptr = FitsFile::open(path).unwrap();
    let hdu = fptr.hdu(index).unwrap();
    hdu.read_image(&mut fptr).unwrap()
}

/// Zero-filled image of `(ny, nx)` in the primary HDU
pub fn blank_image(dir: &Path, name: &str, dim: (usize, usize)) -> PathBuf {
    let path = dir.join(name);
    write_single_plane(&path, &[dim.0, dim.1], &vec![0.0; dim.0 * dim.1]);
    path
}

/// Segmentation map with no real sources
pub fn empty_segmap(dir: &Path, name: &str, dim: (usize, usize)) -> PathBuf {
    let path = dir.join(name);
    write_segmentation(&path, &Array2::zeros(dim)).unwrap();
    path
}
