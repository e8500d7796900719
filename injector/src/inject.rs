//! Rendering accepted mock sources into a data volume.
//!
//! Sources are accumulated into a separate zero-initialized mock volume in
//! acceptance order. Extended (exponential) sources are then blurred once
//! with the seeing PSF; since the blur is linear this equals blurring every
//! source on its own. The mock volume is finally added into the data, touching
//! only voxels where some source contributed.

use log::{debug, info, warn};
use ndarray::{Array3, Zip};
use rand::Rng;

use crate::image_proc::convolve::gaussian_blur_planes;
use crate::placement::{
    FluxDistribution, MockSource, PlacementBounds, PlacementError, PlacementSampler,
};
use crate::profile::{fwhm_to_sigma, support, Normalization, Profile, ProfileKind, SourceShape};
use crate::volume::{BadPixelMask, DataVolume, OccupancyMask, VolumeKind};

/// Default profile support, in sigmas
pub const DEFAULT_FILL: f64 = 6.0;

const MIN_SAFE_FILL: f64 = 3.0;

/// Spatial model of the injected sources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpatialProfile {
    /// Gaussian point source with the given seeing FWHM, in pixels
    Point { fwhm: f64 },
    /// Exponential disk of the given scale length, blurred by the seeing FWHM
    Exponential { scale_length: f64, seeing_fwhm: f64 },
}

impl SpatialProfile {
    pub fn kind(&self) -> ProfileKind {
        match self {
            SpatialProfile::Point { .. } => ProfileKind::Gaussian,
            SpatialProfile::Exponential { .. } => ProfileKind::Exponential,
        }
    }

    /// Spatial sigma of the evaluated profile
    pub fn sigma(&self) -> f64 {
        match *self {
            SpatialProfile::Point { fwhm } => fwhm_to_sigma(fwhm),
            SpatialProfile::Exponential { scale_length, .. } => scale_length,
        }
    }

    /// Sigma of the post-accumulation blur, if any
    pub fn seeing_sigma(&self) -> Option<f64> {
        match *self {
            SpatialProfile::Point { .. } => None,
            SpatialProfile::Exponential { seeing_fwhm, .. } => Some(fwhm_to_sigma(seeing_fwhm)),
        }
    }
}

/// Everything needed to place and render one batch of mocks.
#[derive(Debug, Clone)]
pub struct InjectionConfig {
    pub count: usize,
    pub flux: FluxDistribution,
    pub profile: SpatialProfile,
    /// Spectral FWHM in slices, ignored for images
    pub spectral_fwhm: f64,
    /// Profile support in sigmas. Larger is more accurate but slower.
    pub fill: f64,
    pub normalization: Normalization,
    /// Explicit spectral placement range for cubes, in slices
    pub wave_limits: Option<(f64, f64)>,
    /// Cap on consecutive rejections per source; `None` retries forever
    pub max_attempts: Option<u64>,
}

impl InjectionConfig {
    /// Shape of every source for a volume of the given kind
    pub fn shape(&self, kind: VolumeKind) -> SourceShape {
        let sigma = self.profile.sigma();
        match kind {
            VolumeKind::Cube => SourceShape::cube(sigma, fwhm_to_sigma(self.spectral_fwhm)),
            VolumeKind::Image => SourceShape::image(sigma),
        }
    }

    /// Build the placement sampler for a target volume
    pub fn sampler(&self, volume: &DataVolume) -> Result<PlacementSampler, PlacementError> {
        let bounds = PlacementBounds::for_volume(volume, self.wave_limits);
        bounds.validate_within(volume.dim())?;
        Ok(PlacementSampler::new(
            self.flux,
            bounds,
            self.shape(volume.kind()),
            self.profile.kind(),
        )?
        .with_max_attempts(self.max_attempts))
    }
}

/// Add one source's profile into `mock`.
///
/// Only lattice points strictly inside `bounds` are written. For images the
/// spectral axis is the single plane 0.
pub fn accumulate(
    mock: &mut Array3<f64>,
    source: &MockSource,
    bounds: &PlacementBounds,
    fill: f64,
    normalization: Normalization,
) {
    let profile = Profile::new(source.kind, source.shape, source.flux, normalization);
    let shape = source.shape;

    let spectral: Vec<(usize, f64)> = match (source.w, shape.sigma_w, bounds.w) {
        (Some(wc), Some(sigma_w), Some(wb)) => support(wc, sigma_w, fill)
            .filter(|&w| wb.contains_strict(w as f64))
            .map(|w| (w as usize, w as f64 - wc))
            .collect(),
        _ => vec![(0, 0.0)],
    };
    let ys: Vec<i64> = support(source.y, shape.sigma_y, fill)
        .filter(|&y| bounds.y.contains_strict(y as f64))
        .collect();

    let (nw, ny, nx) = mock.dim();
    for xx in support(source.x, shape.sigma_x, fill) {
        if !bounds.x.contains_strict(xx as f64) || xx as usize >= nx {
            continue;
        }
        let dx = xx as f64 - source.x;
        for &yy in &ys {
            if yy as usize >= ny {
                continue;
            }
            let dy = yy as f64 - source.y;
            for &(ww, dw) in &spectral {
                if ww >= nw {
                    continue;
                }
                mock[[ww, yy as usize, xx as usize]] += profile.evaluate(dx, dy, dw);
            }
        }
    }
}

/// Render a batch of sources into a fresh mock volume of dimension `dim`.
///
/// Exponential sources are blurred by the seeing after accumulation.
pub fn render_mock_volume(
    dim: (usize, usize, usize),
    sources: &[MockSource],
    bounds: &PlacementBounds,
    config: &InjectionConfig,
) -> Array3<f64> {
    let mut mock = Array3::zeros(dim);
    for source in sources {
        accumulate(&mut mock, source, bounds, config.fill, config.normalization);
    }

    if let Some(sigma) = config.profile.seeing_sigma() {
        debug!("Convolving mock volume with seeing sigma {:.3} px", sigma);
        gaussian_blur_planes(&mut mock, sigma);
    }

    mock
}

/// Add a rendered mock volume into the data.
///
/// Voxels where the mock is exactly zero are left untouched, so regions away
/// from every source stay bit-identical.
pub fn apply_mock(volume: &mut DataVolume, mock: &Array3<f64>) {
    Zip::from(volume.data_mut())
        .and(mock)
        .for_each(|data, &added| {
            if added != 0.0 {
                *data += added;
            }
        });
}

/// Place, render and add `config.count` sources into `volume`.
///
/// `occupancy` is updated with every claimed footprint. Returns the accepted
/// sources in acceptance order.
pub fn inject_sources<R: Rng + ?Sized>(
    volume: &mut DataVolume,
    occupancy: &mut OccupancyMask,
    bad_pixels: Option<&BadPixelMask>,
    config: &InjectionConfig,
    rng: &mut R,
) -> Result<Vec<MockSource>, PlacementError> {
    if config.fill < MIN_SAFE_FILL {
        warn!(
            "Profile support of {} sigma truncates a significant part of the flux",
            config.fill
        );
    }

    let sampler = config.sampler(volume)?;
    let sources = sampler.sample_and_register(config.count, occupancy, bad_pixels, volume, rng)?;

    info!(
        "Rendering {} {} sources (fill {} sigma)",
        sources.len(),
        config.profile.kind(),
        config.fill
    );
    let mock = render_mock_volume(volume.dim(), &sources, sampler.bounds(), config);
    apply_mock(volume, &mock);

    Ok(sources)
}
