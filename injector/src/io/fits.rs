//! FITS input and output for data products and masks
//!
//! Data products come in three layouts:
//!
//! - **SinglePlane**: the image (or cube) lives in the primary HDU.
//! - **DataExtension**: the primary HDU is empty and the data is in HDU 1.
//! - **DataPlusVariance**: as above, with a variance array in HDU 2.
//!
//! The layout is detected explicitly when a product is read. An injected
//! product is written as a byte copy of its input with only the data HDU
//! rewritten, so every header card and every other extension (variance
//! included) passes through unchanged.
//!
//! Arrays are kept in FITS storage order, `[y, x]` or `[w, y, x]`.

use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use log::{debug, info};
use ndarray::{Array2, Array3};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::volume::{BadPixelMask, DataVolume};

/// Errors that can occur during FITS file operations
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::errors::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot reshape image data: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("No image data found in {}", .0.display())]
    NoImageData(PathBuf),
    #[error("Unsupported image dimensionality {0} (expected 2 or 3 axes)")]
    UnsupportedDimensions(usize),
    #[error("Shape mismatch: file has {found:?}, data has {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Refusing to overwrite input file {}", .0.display())]
    WouldOverwriteInput(PathBuf),
}

/// Where the data (and variance) of a product live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductLayout {
    SinglePlane,
    DataExtension,
    DataPlusVariance,
}

impl ProductLayout {
    /// HDU index of the data array
    pub fn data_hdu(&self) -> usize {
        match self {
            ProductLayout::SinglePlane => 0,
            ProductLayout::DataExtension | ProductLayout::DataPlusVariance => 1,
        }
    }

    /// HDU index of the variance array, if the layout carries one
    pub fn variance_hdu(&self) -> Option<usize> {
        match self {
            ProductLayout::DataPlusVariance => Some(2),
            _ => None,
        }
    }
}

/// Shape of an image HDU, `None` for tables and empty primaries
fn image_shape(info: &HduInfo) -> Option<&[usize]> {
    match info {
        HduInfo::ImageInfo { shape, .. } if !shape.is_empty() => Some(shape.as_slice()),
        _ => None,
    }
}

/// Inspect the HDU structure of an open file
pub fn detect_layout(fptr: &mut FitsFile, path: &Path) -> Result<ProductLayout, FitsError> {
    let hdu_count = fptr.num_hdus()?;

    let primary = fptr.primary_hdu()?;
    if image_shape(&primary.info).is_some() {
        return Ok(ProductLayout::SinglePlane);
    }

    if hdu_count > 1 && image_shape(&fptr.hdu(1)?.info).is_some() {
        if hdu_count > 2 && image_shape(&fptr.hdu(2)?.info).is_some() {
            return Ok(ProductLayout::DataPlusVariance);
        }
        return Ok(ProductLayout::DataExtension);
    }

    Err(FitsError::NoImageData(path.to_path_buf()))
}

/// A data product read from disk.
#[derive(Debug, Clone)]
pub struct FitsProduct {
    /// File the product was read from
    pub path: PathBuf,
    pub layout: ProductLayout,
    pub volume: DataVolume,
}

/// Read a 2D image or 3D cube product, detecting its layout
///
/// # Arguments
/// * `path` - Path to the FITS file
///
/// # Returns
/// * The product with its volume as `f64`. Two-axis data becomes an image,
///   three-axis data a cube.
pub fn read_product<P: AsRef<Path>>(path: P) -> Result<FitsProduct, FitsError> {
    let path = path.as_ref();
    let mut fptr = FitsFile::open(path)?;
    let layout = detect_layout(&mut fptr, path)?;

    let hdu = fptr.hdu(layout.data_hdu())?;
    let shape = image_shape(&hdu.info)
        .ok_or_else(|| FitsError::NoImageData(path.to_path_buf()))?
        .to_vec();
    let pixels: Vec<f64> = hdu.read_image(&mut fptr)?;

    let volume = match *shape.as_slice() {
        [ny, nx] => DataVolume::image(Array2::from_shape_vec((ny, nx), pixels)?),
        [nw, ny, nx] => DataVolume::cube(Array3::from_shape_vec((nw, ny, nx), pixels)?),
        _ => return Err(FitsError::UnsupportedDimensions(shape.len())),
    };

    info!(
        "Read {:?} product {} with shape {:?}",
        layout,
        path.display(),
        shape
    );

    Ok(FitsProduct {
        path: path.to_path_buf(),
        layout,
        volume,
    })
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl FitsProduct {
    /// Write this product's volume into a copy of its input file
    ///
    /// The input is copied byte for byte to `output`, then the data HDU is
    /// overwritten in place. Writing onto the input path is refused.
    pub fn write_to<P: AsRef<Path>>(&self, output: P) -> Result<(), FitsError> {
        let output = output.as_ref();
        if is_same_file(&self.path, output) {
            return Err(FitsError::WouldOverwriteInput(output.to_path_buf()));
        }

        fs::copy(&self.path, output)?;
        let mut fptr = FitsFile::edit(output)?;
        let hdu = fptr.hdu(self.layout.data_hdu())?;

        let expected = self.volume.fits_shape();
        let found = image_shape(&hdu.info).unwrap_or(&[]).to_vec();
        if found != expected {
            return Err(FitsError::ShapeMismatch { expected, found });
        }

        let pixels: Vec<f64> = self.volume.data().iter().copied().collect();
        hdu.write_image(&mut fptr, &pixels)?;

        debug!(
            "Wrote {} values into HDU {} of {}",
            pixels.len(),
            self.layout.data_hdu(),
            output.display()
        );
        Ok(())
    }
}

/// Read a 2D mask or map from the primary HDU, with NaN read as 0
pub fn read_plane<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, FitsError> {
    let path = path.as_ref();
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.primary_hdu()?;

    let shape = image_shape(&hdu.info)
        .ok_or_else(|| FitsError::NoImageData(path.to_path_buf()))?
        .to_vec();
    let (ny, nx) = match *shape.as_slice() {
        [ny, nx] => (ny, nx),
        _ => return Err(FitsError::UnsupportedDimensions(shape.len())),
    };

    let pixels: Vec<f64> = hdu.read_image(&mut fptr)?;
    let mut plane = Array2::from_shape_vec((ny, nx), pixels)?;
    plane.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });
    Ok(plane)
}

/// Read an integer segmentation map
pub fn read_segmentation<P: AsRef<Path>>(path: P) -> Result<Array2<i32>, FitsError> {
    Ok(read_plane(path)?.mapv(|v| v.round() as i32))
}

/// Read a bad-pixel mask; values `> 0` are bad
pub fn read_bad_pixels<P: AsRef<Path>>(path: P) -> Result<BadPixelMask, FitsError> {
    Ok(BadPixelMask::from_values(&read_plane(path)?))
}

/// Write a segmentation map as a single 32-bit integer HDU, replacing any
/// existing file
pub fn write_segmentation<P: AsRef<Path>>(
    path: P,
    labels: &Array2<i32>,
) -> Result<(), FitsError> {
    let (ny, nx) = labels.dim();
    let description = ImageDescription {
        data_type: ImageType::Long,
        dimensions: &[ny, nx],
    };

    let mut fptr = FitsFile::create(path.as_ref())
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    let hdu = fptr.primary_hdu()?;
    let values: Vec<i32> = labels.iter().copied().collect();
    hdu.write_image(&mut fptr, &values)?;
    Ok(())
}
