//! Data volumes and occupancy masks.
//!
//! Images and cubes share one representation: an `Array3<f64>` indexed as
//! `[w, y, x]`. An image is a single spectral plane tagged with
//! [`VolumeKind::Image`], which keeps every window and accumulation routine
//! free of 2D/3D duplication.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis, Ix3, SliceInfo, SliceInfoElem};
use std::ops::Range;

/// Whether a volume carries a spectral axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    Image,
    Cube,
}

/// Calibrated flux per pixel (image) or voxel (cube). May contain NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct DataVolume {
    data: Array3<f64>,
    kind: VolumeKind,
}

impl DataVolume {
    /// Wrap a 2D image, stored as a single plane
    pub fn image(data: Array2<f64>) -> Self {
        Self {
            data: data.insert_axis(Axis(0)),
            kind: VolumeKind::Image,
        }
    }

    /// Wrap a `[w, y, x]` cube
    pub fn cube(data: Array3<f64>) -> Self {
        Self {
            data,
            kind: VolumeKind::Cube,
        }
    }

    /// All-zero volume of the given kind and `(nw, ny, nx)` dimensions
    pub fn zeros(kind: VolumeKind, dim: (usize, usize, usize)) -> Self {
        let dim = match kind {
            VolumeKind::Image => (1, dim.1, dim.2),
            VolumeKind::Cube => dim,
        };
        Self {
            data: Array3::zeros(dim),
            kind,
        }
    }

    pub fn kind(&self) -> VolumeKind {
        self.kind
    }

    /// Dimensions as `(nw, ny, nx)`; `nw` is 1 for images
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    /// Spatial plane `w`
    pub fn plane(&self, w: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), w)
    }

    /// FITS-order shape: `[ny, nx]` for images, `[nw, ny, nx]` for cubes
    pub fn fits_shape(&self) -> Vec<usize> {
        let (nw, ny, nx) = self.dim();
        match self.kind {
            VolumeKind::Image => vec![ny, nx],
            VolumeKind::Cube => vec![nw, ny, nx],
        }
    }

    /// Sum of the data inside a window. NaN if any voxel in it is NaN.
    pub fn window_sum(&self, window: &Window) -> f64 {
        self.data.slice(window.slice_info()).sum()
    }
}

/// A half-open box of voxel indices, already clamped to its volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub w: Range<usize>,
    pub y: Range<usize>,
    pub x: Range<usize>,
}

impl Window {
    /// Window spanning `[ceil(c) - half, ceil(c) + half)` on each axis.
    ///
    /// `center` and `half` are `(x, y, w)`; a missing spectral center spans
    /// the whole (single-plane) spectral axis. `dim` is `(nw, ny, nx)`.
    pub fn around(
        center: (f64, f64, Option<f64>),
        half: (usize, usize, usize),
        dim: (usize, usize, usize),
    ) -> Self {
        let (nw, ny, nx) = dim;
        let w = match center.2 {
            Some(cw) => axis_range(cw, half.2, nw),
            None => 0..nw,
        };
        Self {
            w,
            y: axis_range(center.1, half.1, ny),
            x: axis_range(center.0, half.0, nx),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty() || self.y.is_empty() || self.x.is_empty()
    }

    fn slice_info(&self) -> SliceInfo<[SliceInfoElem; 3], Ix3, Ix3> {
        s![self.w.clone(), self.y.clone(), self.x.clone()]
    }
}

fn axis_range(center: f64, half: usize, len: usize) -> Range<usize> {
    let pivot = center.ceil() as i64;
    let half = half as i64;
    let lo = (pivot - half).clamp(0, len as i64) as usize;
    let hi = (pivot + half).clamp(0, len as i64) as usize;
    lo..hi.max(lo)
}

/// Pixels already claimed by real sources or previously placed mocks.
///
/// Labels `> 0` are occupied. For cubes the spatial segmentation map is
/// broadcast to every spectral plane, and mocks only claim the planes their
/// footprint covers. Claims are never released within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyMask {
    labels: Array3<i32>,
}

impl OccupancyMask {
    /// Broadcast a segmentation map over `depth` spectral planes
    pub fn from_segmentation(segmentation: &Array2<i32>, depth: usize) -> Self {
        let (ny, nx) = segmentation.dim();
        let labels = Array3::from_shape_fn((depth.max(1), ny, nx), |(_, y, x)| {
            segmentation[[y, x]]
        });
        Self { labels }
    }

    /// Mask with nothing occupied, shaped like `volume`
    pub fn empty_like(volume: &DataVolume) -> Self {
        Self {
            labels: Array3::zeros(volume.dim()),
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.labels.dim()
    }

    pub fn labels(&self) -> &Array3<i32> {
        &self.labels
    }

    /// Spatial plane `w` of the label array
    pub fn plane(&self, w: usize) -> ArrayView2<'_, i32> {
        self.labels.index_axis(Axis(0), w)
    }

    pub fn is_free(&self, window: &Window) -> bool {
        !self
            .labels
            .slice(window.slice_info())
            .iter()
            .any(|&label| label > 0)
    }

    /// Mark every voxel of the window as occupied
    pub fn claim(&mut self, window: &Window) {
        self.labels.slice_mut(window.slice_info()).fill(1);
    }

    pub fn occupied_count(&self) -> usize {
        self.labels.iter().filter(|&&label| label > 0).count()
    }
}

/// Known-bad detector pixels, shared by every spectral plane.
#[derive(Debug, Clone, PartialEq)]
pub struct BadPixelMask {
    bad: Array2<bool>,
}

impl BadPixelMask {
    /// Pixels with values `> 0` are bad
    pub fn from_values(values: &Array2<f64>) -> Self {
        Self {
            bad: values.mapv(|v| v > 0.0),
        }
    }

    pub fn from_flags(bad: Array2<bool>) -> Self {
        Self { bad }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.bad.dim()
    }

    pub fn is_clear(&self, window: &Window) -> bool {
        !self
            .bad
            .slice(s![window.y.clone(), window.x.clone()])
            .iter()
            .any(|&b| b)
    }
}
