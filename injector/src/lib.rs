//! Mock source injection for detection completeness testing
//!
//! This crate places artificial point and extended sources into real
//! astronomical data products (emission lines in spectral cubes, continuum
//! sources in images), records what was injected, and measures how many of
//! them an external source finder recovers.

pub mod image_proc;
pub mod inject;
pub mod io;
pub mod pipeline;
pub mod placement;
pub mod profile;
pub mod recovery;
pub mod shared_args;
pub mod volume;

use std::path::PathBuf;
use thiserror::Error;

// Re-exports for easier access
pub use inject::{inject_sources, InjectionConfig, SpatialProfile};
pub use io::{CatalogError, FitsError, FitsProduct, ProductLayout};
pub use pipeline::{ContinuumMockConfig, ContinuumMockJob, JobOutput, LineMockConfig, LineMockJob};
pub use placement::{FluxDistribution, MockSource, PlacementError, PlacementSampler};
pub use profile::{fwhm_to_sigma, Normalization, Profile, ProfileKind, SourceShape};
pub use recovery::{CommandDetector, RecoveryConfig, RecoveryError, SourceDetector};
pub use volume::{BadPixelMask, DataVolume, OccupancyMask, VolumeKind};

/// Any failure of an injection or recovery run
#[derive(Error, Debug)]
pub enum InjectError {
    #[error(transparent)]
    Placement(#[from] PlacementError),
    #[error(transparent)]
    Fits(#[from] FitsError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}: expected {expected:?} data, found {found:?}", .path.display())]
    UnexpectedVolume {
        path: PathBuf,
        expected: VolumeKind,
        found: VolumeKind,
    },
    #[error(
        "{}: mask shape {found:?} does not match data shape {expected:?}",
        .path.display()
    )]
    MaskShape {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },
}
