//! Injection jobs: load a product and its masks, place and render mocks,
//! then write the modified product, the mock catalog and (for continuum
//! runs) the updated segmentation map.
//!
//! Output names follow the input names:
//!
//! - product: `{output_dir}/{prefix}_{input file name}`
//! - catalog: `{output_dir}/{prefix}_{input stem}_catalogue.txt`
//! - segmentation (continuum only): `{output_dir}/{prefix}_{segmap file name}`

use log::info;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

use crate::inject::{inject_sources, InjectionConfig, SpatialProfile, DEFAULT_FILL};
use crate::io::catalog::write_catalog;
use crate::io::fits::{
    read_bad_pixels, read_product, read_segmentation, write_segmentation, FitsProduct,
    ProductLayout,
};
use crate::placement::{FluxDistribution, MockSource};
use crate::profile::Normalization;
use crate::volume::{BadPixelMask, OccupancyMask, VolumeKind};
use crate::InjectError;

/// Default number of line mocks per cube
pub const DEFAULT_LINE_COUNT: usize = 500;
/// Default number of continuum mocks per image
pub const DEFAULT_CONTINUUM_COUNT: usize = 100;
/// Default seeing FWHM, in pixels
pub const DEFAULT_SPATIAL_FWHM: f64 = 3.5;
/// Default line width, in slices
pub const DEFAULT_SPECTRAL_FWHM: f64 = 2.0;
/// Default exponential scale length for continuum mocks, in pixels
pub const DEFAULT_EXP_SCALE: f64 = 1.5;

/// Where a job writes its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub product: PathBuf,
    pub catalog: PathBuf,
    pub segmentation: Option<PathBuf>,
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Everything before the first `.fits` in a file name
fn product_stem(file_name: &str) -> &str {
    match file_name.find(".fits") {
        Some(end) => &file_name[..end],
        None => file_name,
    }
}

impl OutputPaths {
    pub fn new(output_dir: &Path, prefix: &str, input: &Path, segmap: Option<&Path>) -> Self {
        let file_name = file_name_of(input);
        Self {
            product: output_dir.join(format!("{}_{}", prefix, file_name)),
            catalog: output_dir.join(format!(
                "{}_{}_catalogue.txt",
                prefix,
                product_stem(&file_name)
            )),
            segmentation: segmap
                .map(|seg| output_dir.join(format!("{}_{}", prefix, file_name_of(seg)))),
        }
    }
}

/// Result of a finished job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub paths: OutputPaths,
    pub layout: ProductLayout,
    /// Injected sources, in acceptance order
    pub sources: Vec<MockSource>,
}

/// Parameters of an emission-line run on a cube.
#[derive(Debug, Clone)]
pub struct LineMockConfig {
    pub num: usize,
    /// Linear flux range; fluxes are drawn uniformly in log space
    pub flux_range: (f64, f64),
    /// Spectral placement range in slices; defaults to 10 slices from each end
    pub wave_limits: Option<(f64, f64)>,
    pub spatial_fwhm: f64,
    pub spectral_fwhm: f64,
    /// Exponential scale length; point sources when `None`
    pub exp_scale: Option<f64>,
    pub fill: f64,
    pub prefix: String,
    pub output_dir: PathBuf,
    pub max_attempts: Option<u64>,
    pub normalization: Normalization,
}

impl LineMockConfig {
    /// Defaults for everything but the flux range
    pub fn new(flux_range: (f64, f64)) -> Self {
        Self {
            num: DEFAULT_LINE_COUNT,
            flux_range,
            wave_limits: None,
            spatial_fwhm: DEFAULT_SPATIAL_FWHM,
            spectral_fwhm: DEFAULT_SPECTRAL_FWHM,
            exp_scale: None,
            fill: DEFAULT_FILL,
            prefix: "mocks".to_string(),
            output_dir: PathBuf::from("."),
            max_attempts: None,
            normalization: Normalization::default(),
        }
    }

    pub fn injection_config(&self) -> InjectionConfig {
        let profile = match self.exp_scale {
            Some(scale_length) => SpatialProfile::Exponential {
                scale_length,
                seeing_fwhm: self.spatial_fwhm,
            },
            None => SpatialProfile::Point {
                fwhm: self.spatial_fwhm,
            },
        };
        InjectionConfig {
            count: self.num,
            flux: FluxDistribution::LogUniform {
                min: self.flux_range.0,
                max: self.flux_range.1,
            },
            profile,
            spectral_fwhm: self.spectral_fwhm,
            fill: self.fill,
            normalization: self.normalization,
            wave_limits: self.wave_limits,
            max_attempts: self.max_attempts,
        }
    }
}

/// Parameters of a continuum run on an image.
#[derive(Debug, Clone)]
pub struct ContinuumMockConfig {
    pub num: usize,
    /// Linear flux range, or magnitude range when `zero_point` is set
    pub flux_range: (f64, f64),
    pub zero_point: Option<f64>,
    pub spatial_fwhm: f64,
    /// Exponential disks convolved with the seeing instead of point sources
    pub exponential: bool,
    pub exp_scale: f64,
    pub fill: f64,
    pub prefix: String,
    pub output_dir: PathBuf,
    pub max_attempts: Option<u64>,
    pub normalization: Normalization,
}

impl ContinuumMockConfig {
    /// Defaults for everything but the flux range
    pub fn new(flux_range: (f64, f64)) -> Self {
        Self {
            num: DEFAULT_CONTINUUM_COUNT,
            flux_range,
            zero_point: None,
            spatial_fwhm: DEFAULT_SPATIAL_FWHM,
            exponential: false,
            exp_scale: DEFAULT_EXP_SCALE,
            fill: DEFAULT_FILL,
            prefix: "cmocks".to_string(),
            output_dir: PathBuf::from("."),
            max_attempts: None,
            normalization: Normalization::default(),
        }
    }

    pub fn injection_config(&self) -> InjectionConfig {
        let (min, max) = self.flux_range;
        let flux = match self.zero_point {
            Some(zero_point) => FluxDistribution::Magnitude {
                min_mag: min,
                max_mag: max,
                zero_point,
            },
            None => FluxDistribution::Uniform { min, max },
        };
        let profile = if self.exponential {
            SpatialProfile::Exponential {
                scale_length: self.exp_scale,
                seeing_fwhm: self.spatial_fwhm,
            }
        } else {
            SpatialProfile::Point {
                fwhm: self.spatial_fwhm,
            }
        };
        InjectionConfig {
            count: self.num,
            flux,
            profile,
            spectral_fwhm: DEFAULT_SPECTRAL_FWHM,
            fill: self.fill,
            normalization: self.normalization,
            wave_limits: None,
            max_attempts: self.max_attempts,
        }
    }
}

/// Inputs shared by both job kinds
struct LoadedInputs {
    product: FitsProduct,
    occupancy: OccupancyMask,
    bad_pixels: Option<BadPixelMask>,
}

fn load_inputs(
    input: &Path,
    expected: VolumeKind,
    segmap: &Path,
    badmask: Option<&Path>,
) -> Result<LoadedInputs, InjectError> {
    let product = read_product(input)?;
    let found = product.volume.kind();
    if found != expected {
        return Err(InjectError::UnexpectedVolume {
            path: input.to_path_buf(),
            expected,
            found,
        });
    }
    let (nw, ny, nx) = product.volume.dim();

    let segmentation = read_segmentation(segmap)?;
    check_mask_shape(segmap, (ny, nx), segmentation.dim())?;
    let occupancy = OccupancyMask::from_segmentation(&segmentation, nw);

    let bad_pixels = match badmask {
        Some(path) => {
            let mask = read_bad_pixels(path)?;
            check_mask_shape(path, (ny, nx), mask.dim())?;
            Some(mask)
        }
        None => None,
    };

    Ok(LoadedInputs {
        product,
        occupancy,
        bad_pixels,
    })
}

fn check_mask_shape(
    path: &Path,
    expected: (usize, usize),
    found: (usize, usize),
) -> Result<(), InjectError> {
    if expected != found {
        return Err(InjectError::MaskShape {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Run the shared load, inject and write steps
fn run_job<R: Rng + ?Sized>(
    input: &Path,
    kind: VolumeKind,
    segmap: &Path,
    badmask: Option<&Path>,
    config: &InjectionConfig,
    paths: OutputPaths,
    rng: &mut R,
) -> Result<JobOutput, InjectError> {
    let LoadedInputs {
        mut product,
        mut occupancy,
        bad_pixels,
    } = load_inputs(input, kind, segmap, badmask)?;

    let sources = inject_sources(
        &mut product.volume,
        &mut occupancy,
        bad_pixels.as_ref(),
        config,
        rng,
    )?;

    if let Some(parent) = paths.product.parent() {
        fs::create_dir_all(parent)?;
    }
    product.write_to(&paths.product)?;
    write_catalog(&paths.catalog, &sources)?;
    if let Some(seg_path) = &paths.segmentation {
        write_segmentation(seg_path, &occupancy.plane(0).to_owned())?;
    }

    info!(
        "Wrote {} ({:?}) and {} with {} sources",
        paths.product.display(),
        product.layout,
        paths.catalog.display(),
        sources.len()
    );
    if let Some(index) = product.layout.variance_hdu() {
        info!("Variance in HDU {} passed through unchanged", index);
    }

    Ok(JobOutput {
        paths,
        layout: product.layout,
        sources,
    })
}

/// Inject emission lines into a cube.
#[derive(Debug, Clone)]
pub struct LineMockJob {
    pub cube: PathBuf,
    pub segmap: PathBuf,
    pub badmask: Option<PathBuf>,
    pub config: LineMockConfig,
}

impl LineMockJob {
    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths::new(&self.config.output_dir, &self.config.prefix, &self.cube, None)
    }

    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<JobOutput, InjectError> {
        info!("Injecting {} line mocks into {}", self.config.num, self.cube.display());
        run_job(
            &self.cube,
            VolumeKind::Cube,
            &self.segmap,
            self.badmask.as_deref(),
            &self.config.injection_config(),
            self.output_paths(),
            rng,
        )
    }
}

/// Inject continuum sources into an image.
#[derive(Debug, Clone)]
pub struct ContinuumMockJob {
    pub image: PathBuf,
    pub segmap: PathBuf,
    pub badmask: Option<PathBuf>,
    pub config: ContinuumMockConfig,
}

impl ContinuumMockJob {
    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths::new(
            &self.config.output_dir,
            &self.config.prefix,
            &self.image,
            Some(&self.segmap),
        )
    }

    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<JobOutput, InjectError> {
        info!(
            "Injecting {} continuum mocks into {}",
            self.config.num,
            self.image.display()
        );
        run_job(
            &self.image,
            VolumeKind::Image,
            &self.segmap,
            self.badmask.as_deref(),
            &self.config.injection_config(),
            self.output_paths(),
            rng,
        )
    }
}
