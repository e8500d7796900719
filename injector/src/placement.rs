//! Random placement of mock sources with collision avoidance.
//!
//! Candidates are drawn independently (flux first, then x, y and w) and
//! tested against a rejection footprint of `ceil(3σ)` pixels per axis. A
//! footprint is admissible when it touches no occupied voxel, no bad pixel
//! and no NaN data. Accepted candidates claim their footprint in the
//! occupancy mask, so later candidates cannot overlap them.
//!
//! The retry loop is unbounded by default. Set
//! [`PlacementSampler::with_max_attempts`] to fail with
//! [`PlacementError::InsufficientSpace`] instead of spinning forever when the
//! free area is exhausted.

use log::{debug, info};
use rand::Rng;
use thiserror::Error;

use crate::profile::{ProfileKind, SourceShape};
use crate::volume::{BadPixelMask, DataVolume, OccupancyMask, VolumeKind, Window};

/// Spatial inset from the array edges, in pixels
pub const SPATIAL_MARGIN: usize = 20;

/// Spectral inset from the cube ends, in slices
pub const SPECTRAL_MARGIN: usize = 10;

/// Rejection footprint half-width, in sigmas
pub const FOOTPRINT_SIGMAS: f64 = 3.0;

#[derive(Error, Debug, PartialEq)]
pub enum PlacementError {
    #[error("Invalid flux range [{0}, {1}]: {2}")]
    InvalidFluxRange(f64, f64, &'static str),
    #[error("Empty placement range on {axis} axis: [{min}, {max})")]
    EmptyPlacementRange {
        axis: &'static str,
        min: f64,
        max: f64,
    },
    #[error(
        "Placement range on {axis} axis [{min}, {max}) lies outside the data extent [0, {len})"
    )]
    PlacementRangeOutOfBounds {
        axis: &'static str,
        min: f64,
        max: f64,
        len: usize,
    },
    #[error(
        "Placed {placed} of {requested} sources; gave up after {attempts} rejected draws"
    )]
    InsufficientSpace {
        placed: usize,
        requested: usize,
        attempts: u64,
    },
}

/// Convert an AB-style magnitude to linear flux given a zero point
pub fn mag_to_flux(mag: f64, zero_point: f64) -> f64 {
    10f64.powf(-0.4 * (mag - zero_point))
}

/// Inverse of [`mag_to_flux`]
pub fn flux_to_mag(flux: f64, zero_point: f64) -> f64 {
    -2.5 * flux.log10() + zero_point
}

/// Distribution of injected fluxes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FluxDistribution {
    /// Uniform in `log10(flux)`; used for emission lines
    LogUniform { min: f64, max: f64 },
    /// Uniform in linear flux
    Uniform { min: f64, max: f64 },
    /// Uniform in magnitude, converted through the zero point
    Magnitude {
        min_mag: f64,
        max_mag: f64,
        zero_point: f64,
    },
}

impl FluxDistribution {
    pub fn validate(&self) -> Result<(), PlacementError> {
        let (lo, hi) = match *self {
            FluxDistribution::LogUniform { min, max } => {
                if min <= 0.0 {
                    return Err(PlacementError::InvalidFluxRange(
                        min,
                        max,
                        "log-space draws need positive bounds",
                    ));
                }
                (min, max)
            }
            FluxDistribution::Uniform { min, max } => (min, max),
            FluxDistribution::Magnitude {
                min_mag, max_mag, ..
            } => (min_mag, max_mag),
        };

        if !lo.is_finite() || !hi.is_finite() {
            return Err(PlacementError::InvalidFluxRange(
                lo,
                hi,
                "bounds must be finite",
            ));
        }
        if lo >= hi {
            return Err(PlacementError::InvalidFluxRange(
                lo,
                hi,
                "min must be below max",
            ));
        }
        Ok(())
    }

    /// Draw one linear flux
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            FluxDistribution::LogUniform { min, max } => {
                10f64.powf(rng.random_range(min.log10()..max.log10()))
            }
            FluxDistribution::Uniform { min, max } => rng.random_range(min..max),
            FluxDistribution::Magnitude {
                min_mag,
                max_mag,
                zero_point,
            } => mag_to_flux(rng.random_range(min_mag..max_mag), zero_point),
        }
    }

    /// Closed range of linear fluxes this distribution can produce
    pub fn flux_bounds(&self) -> (f64, f64) {
        match *self {
            FluxDistribution::LogUniform { min, max }
            | FluxDistribution::Uniform { min, max } => (min, max),
            FluxDistribution::Magnitude {
                min_mag,
                max_mag,
                zero_point,
            } => (
                mag_to_flux(max_mag, zero_point),
                mag_to_flux(min_mag, zero_point),
            ),
        }
    }
}

/// Half-open coordinate interval a source center may be drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

impl AxisBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `[margin, len - margin)`
    pub fn inset(len: usize, margin: usize) -> Self {
        Self {
            min: margin as f64,
            max: len as f64 - margin as f64,
        }
    }

    /// Strictly inside the interval, as used when accumulating profiles
    pub fn contains_strict(&self, p: f64) -> bool {
        p > self.min && p < self.max
    }
}

/// Margin-trimmed region in which sources are placed and rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementBounds {
    pub x: AxisBounds,
    pub y: AxisBounds,
    /// Spectral range, cubes only
    pub w: Option<AxisBounds>,
}

impl PlacementBounds {
    /// Default insets for a volume: 20 pixels spatially and, for cubes, either
    /// the explicit slice range or 10 slices from each end.
    pub fn for_volume(volume: &DataVolume, wave_limits: Option<(f64, f64)>) -> Self {
        let (nw, ny, nx) = volume.dim();
        let w = match volume.kind() {
            VolumeKind::Image => None,
            VolumeKind::Cube => Some(match wave_limits {
                Some((lo, hi)) => AxisBounds::new(lo, hi),
                None => AxisBounds::inset(nw, SPECTRAL_MARGIN),
            }),
        };
        Self {
            x: AxisBounds::inset(nx, SPATIAL_MARGIN),
            y: AxisBounds::inset(ny, SPATIAL_MARGIN),
            w,
        }
    }

    pub fn validate(&self) -> Result<(), PlacementError> {
        let axes = [("x", Some(self.x)), ("y", Some(self.y)), ("w", self.w)];
        for (axis, bounds) in axes {
            if let Some(AxisBounds { min, max }) = bounds {
                if min.is_nan() || max.is_nan() || min >= max {
                    return Err(PlacementError::EmptyPlacementRange { axis, min, max });
                }
            }
        }
        Ok(())
    }

    /// Check every range against a volume of `dim` `(nw, ny, nx)`
    ///
    /// Centers outside the data would produce empty footprints and sources
    /// that are cataloged but never rendered.
    pub fn validate_within(&self, dim: (usize, usize, usize)) -> Result<(), PlacementError> {
        self.validate()?;
        let (nw, ny, nx) = dim;
        let axes = [("x", Some(self.x), nx), ("y", Some(self.y), ny), ("w", self.w, nw)];
        for (axis, bounds, len) in axes {
            if let Some(AxisBounds { min, max }) = bounds {
                if min < 0.0 || max > len as f64 {
                    return Err(PlacementError::PlacementRangeOutOfBounds {
                        axis,
                        min,
                        max,
                        len,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A drawn but not yet accepted source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: f64,
    pub y: f64,
    pub w: Option<f64>,
    pub flux: f64,
}

/// An accepted, injected source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockSource {
    pub x: f64,
    pub y: f64,
    /// Spectral center, cubes only
    pub w: Option<f64>,
    /// Total linear flux
    pub flux: f64,
    pub shape: SourceShape,
    pub kind: ProfileKind,
}

/// Draws candidates and registers the admissible ones.
#[derive(Debug, Clone)]
pub struct PlacementSampler {
    flux: FluxDistribution,
    bounds: PlacementBounds,
    shape: SourceShape,
    kind: ProfileKind,
    max_attempts: Option<u64>,
}

impl PlacementSampler {
    pub fn new(
        flux: FluxDistribution,
        bounds: PlacementBounds,
        shape: SourceShape,
        kind: ProfileKind,
    ) -> Result<Self, PlacementError> {
        flux.validate()?;
        bounds.validate()?;
        Ok(Self {
            flux,
            bounds,
            shape,
            kind,
            max_attempts: None,
        })
    }

    /// Give up after this many consecutive rejections for a single source
    pub fn with_max_attempts(mut self, max_attempts: Option<u64>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn bounds(&self) -> &PlacementBounds {
        &self.bounds
    }

    pub fn flux(&self) -> &FluxDistribution {
        &self.flux
    }

    /// Half-widths `(x, y, w)` of the rejection footprint
    pub fn footprint_half(&self) -> (usize, usize, usize) {
        let half = |sigma: f64| (FOOTPRINT_SIGMAS * sigma).ceil() as usize;
        (
            half(self.shape.sigma_x),
            half(self.shape.sigma_y),
            self.shape.sigma_w.map_or(0, half),
        )
    }

    /// Draw a candidate. Consumes randomness in the order flux, x, y, w.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Candidate {
        let flux = self.flux.sample(rng);
        let x = rng.random_range(self.bounds.x.min..self.bounds.x.max);
        let y = rng.random_range(self.bounds.y.min..self.bounds.y.max);
        let w = self.bounds.w.map(|w| rng.random_range(w.min..w.max));
        Candidate { x, y, w, flux }
    }

    /// Rejection footprint of a candidate within a volume of `dim` `(nw, ny, nx)`
    pub fn footprint(&self, candidate: &Candidate, dim: (usize, usize, usize)) -> Window {
        Window::around(
            (candidate.x, candidate.y, candidate.w),
            self.footprint_half(),
            dim,
        )
    }

    /// True when the footprint is non-empty, unoccupied, free of bad pixels
    /// and free of NaN data
    pub fn is_admissible(
        &self,
        candidate: &Candidate,
        occupancy: &OccupancyMask,
        bad_pixels: Option<&BadPixelMask>,
        data: &DataVolume,
    ) -> bool {
        let window = self.footprint(candidate, data.dim());
        !window.is_empty()
            && occupancy.is_free(&window)
            && bad_pixels.map_or(true, |bad| bad.is_clear(&window))
            && !data.window_sum(&window).is_nan()
    }

    /// Claim the candidate's footprint and turn it into a source record
    pub fn accept(&self, candidate: Candidate, occupancy: &mut OccupancyMask) -> MockSource {
        let window = self.footprint(&candidate, occupancy.dim());
        occupancy.claim(&window);
        MockSource {
            x: candidate.x,
            y: candidate.y,
            w: candidate.w,
            flux: candidate.flux,
            shape: self.shape,
            kind: self.kind,
        }
    }

    /// Place `count` sources, redrawing every inadmissible candidate.
    ///
    /// Sources are returned in acceptance order. Each accepted footprint is
    /// claimed before the next draw.
    pub fn sample_and_register<R: Rng + ?Sized>(
        &self,
        count: usize,
        occupancy: &mut OccupancyMask,
        bad_pixels: Option<&BadPixelMask>,
        data: &DataVolume,
        rng: &mut R,
    ) -> Result<Vec<MockSource>, PlacementError> {
        info!("Placing {} mock sources", count);

        let mut sources = Vec::with_capacity(count);
        let mut total_rejections: u64 = 0;

        while sources.len() < count {
            let mut attempts: u64 = 0;
            let candidate = loop {
                let candidate = self.sample(rng);
                if self.is_admissible(&candidate, occupancy, bad_pixels, data) {
                    break candidate;
                }
                attempts += 1;
                if let Some(max) = self.max_attempts {
                    if attempts >= max {
                        return Err(PlacementError::InsufficientSpace {
                            placed: sources.len(),
                            requested: count,
                            attempts,
                        });
                    }
                }
            };
            total_rejections += attempts;

            let source = self.accept(candidate, occupancy);
            debug!(
                "Accepted source {} at ({:.2}, {:.2}, {:?}) flux {:.4e} after {} rejections",
                sources.len(),
                source.x,
                source.y,
                source.w,
                source.flux,
                attempts
            );
            sources.push(source);
        }

        info!(
            "Placed {} sources ({} candidates rejected)",
            sources.len(),
            total_rejections
        );
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{s, Array2, Array3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gaussian_sampler(volume: &DataVolume, sigma: f64) -> PlacementSampler {
        let shape = match volume.kind() {
            VolumeKind::Image => SourceShape::image(sigma),
            VolumeKind::Cube => SourceShape::cube(sigma, sigma),
        };
        PlacementSampler::new(
            FluxDistribution::Uniform { min: 1.0, max: 2.0 },
            PlacementBounds::for_volume(volume, None),
            shape,
            ProfileKind::Gaussian,
        )
        .unwrap()
    }

    #[test]
    fn test_mag_flux_roundtrip() {
        let zp = 28.35665;
        assert_eq!(mag_to_flux(zp, zp), 1.0);
        assert_relative_eq!(flux_to_mag(mag_to_flux(25.3, zp), zp), 25.3, epsilon = 1e-12);
        // Fainter magnitudes are smaller fluxes
        assert!(mag_to_flux(29.0, zp) < mag_to_flux(23.0, zp));
    }

    #[test]
    fn test_fluxes_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let dists = [
            FluxDistribution::LogUniform {
                min: 1e-20,
                max: 5e-18,
            },
            FluxDistribution::Uniform {
                min: 10.0,
                max: 100.0,
            },
            FluxDistribution::Magnitude {
                min_mag: 23.0,
                max_mag: 29.0,
                zero_point: 28.35665,
            },
        ];
        for dist in dists {
            dist.validate().unwrap();
            let (lo, hi) = dist.flux_bounds();
            for _ in 0..2000 {
                let f = dist.sample(&mut rng);
                assert!(
                    f >= lo * (1.0 - 1e-12) && f <= hi * (1.0 + 1e-12),
                    "{f} outside [{lo}, {hi}]"
                );
            }
        }
    }

    #[test]
    fn test_invalid_flux_ranges() {
        assert!(matches!(
            FluxDistribution::LogUniform { min: 0.0, max: 1.0 }.validate(),
            Err(PlacementError::InvalidFluxRange(..))
        ));
        assert!(matches!(
            FluxDistribution::Uniform { min: 5.0, max: 1.0 }.validate(),
            Err(PlacementError::InvalidFluxRange(..))
        ));
        assert!(matches!(
            FluxDistribution::Uniform {
                min: 0.0,
                max: f64::INFINITY
            }
            .validate(),
            Err(PlacementError::InvalidFluxRange(..))
        ));
    }

    #[test]
    fn test_too_small_volume_is_rejected() {
        let vol = DataVolume::image(Array2::zeros((30, 30)));
        let result = PlacementSampler::new(
            FluxDistribution::Uniform { min: 1.0, max: 2.0 },
            PlacementBounds::for_volume(&vol, None),
            SourceShape::image(1.0),
            ProfileKind::Gaussian,
        );
        assert!(matches!(
            result,
            Err(PlacementError::EmptyPlacementRange { axis: "x", .. })
        ));
    }

    #[test]
    fn test_centers_within_margins() {
        let vol = DataVolume::zeros(VolumeKind::Cube, (40, 60, 70));
        let sampler = gaussian_sampler(&vol, 1.0);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let c = sampler.sample(&mut rng);
            assert!((20.0..50.0).contains(&c.x));
            assert!((20.0..40.0).contains(&c.y));
            assert!((10.0..30.0).contains(&c.w.unwrap()));
        }
    }

    #[test]
    fn test_wave_limits_restrict_spectral_center() {
        let vol = DataVolume::zeros(VolumeKind::Cube, (100, 50, 50));
        let bounds = PlacementBounds::for_volume(&vol, Some((40.0, 45.0)));
        assert_eq!(bounds.w, Some(AxisBounds::new(40.0, 45.0)));
    }

    #[test]
    fn test_wave_limits_outside_cube_are_rejected() {
        let vol = DataVolume::zeros(VolumeKind::Cube, (50, 50, 50));
        let bounds = PlacementBounds::for_volume(&vol, Some((60.0, 80.0)));
        assert_eq!(
            bounds.validate_within(vol.dim()),
            Err(PlacementError::PlacementRangeOutOfBounds {
                axis: "w",
                min: 60.0,
                max: 80.0,
                len: 50
            })
        );
        assert!(PlacementBounds::for_volume(&vol, Some((-5.0, 20.0)))
            .validate_within(vol.dim())
            .is_err());
        assert!(PlacementBounds::for_volume(&vol, Some((0.0, 50.0)))
            .validate_within(vol.dim())
            .is_ok());
    }

    #[test]
    fn test_empty_footprint_is_inadmissible() {
        let vol = DataVolume::zeros(VolumeKind::Cube, (50, 50, 50));
        let occ = OccupancyMask::empty_like(&vol);
        let sampler = gaussian_sampler(&vol, 1.0);
        let outside = Candidate {
            x: 25.0,
            y: 25.0,
            w: Some(70.0),
            flux: 1.0,
        };
        assert!(sampler.footprint(&outside, vol.dim()).is_empty());
        assert!(!sampler.is_admissible(&outside, &occ, None, &vol));

        let inside = Candidate {
            w: Some(25.0),
            ..outside
        };
        assert!(sampler.is_admissible(&inside, &occ, None, &vol));
    }

    #[test]
    fn test_lands_in_only_free_island() {
        let vol = DataVolume::image(Array2::zeros((60, 60)));
        let mut seg = Array2::<i32>::ones((60, 60));
        seg.slice_mut(s![28..33, 28..33]).fill(0);
        let mut occ = OccupancyMask::from_segmentation(&seg, 1);

        // 3σ rounds up to 2 pixels, a 4x4 footprint fits in the 5x5 island
        let sampler = gaussian_sampler(&vol, 0.5);
        let mut rng = StdRng::seed_from_u64(2024);
        let sources = sampler
            .sample_and_register(1, &mut occ, None, &vol, &mut rng)
            .unwrap();

        assert_eq!(sources.len(), 1);
        let src = sources[0];
        assert!(src.x > 28.0 && src.x < 33.0, "x = {}", src.x);
        assert!(src.y > 28.0 && src.y < 33.0, "y = {}", src.y);
    }

    #[test]
    fn test_nan_data_is_avoided() {
        let mut data = Array2::from_elem((60, 60), f64::NAN);
        data.slice_mut(s![28..33, 28..33]).fill(0.0);
        let vol = DataVolume::image(data);
        let mut occ = OccupancyMask::empty_like(&vol);

        let sampler = gaussian_sampler(&vol, 0.5);
        let mut rng = StdRng::seed_from_u64(99);
        let sources = sampler
            .sample_and_register(1, &mut occ, None, &vol, &mut rng)
            .unwrap();
        let src = sources[0];
        assert!(src.x > 28.0 && src.x < 33.0);
        assert!(src.y > 28.0 && src.y < 33.0);
    }

    #[test]
    fn test_bad_pixels_are_avoided() {
        let vol = DataVolume::image(Array2::zeros((60, 60)));
        let mut flags = Array2::from_elem((60, 60), true);
        flags.slice_mut(s![10..15, 40..45]).fill(false);
        let bad = BadPixelMask::from_flags(flags);
        let mut occ = OccupancyMask::empty_like(&vol);

        // The only good pixels sit in rows 10..15, outside the y range [20, 40)
        let sampler = gaussian_sampler(&vol, 0.5).with_max_attempts(Some(20_000));
        let mut rng = StdRng::seed_from_u64(5);
        let result = sampler.sample_and_register(1, &mut occ, Some(&bad), &vol, &mut rng);
        assert!(matches!(
            result,
            Err(PlacementError::InsufficientSpace {
                placed: 0,
                requested: 1,
                attempts: 20_000
            })
        ));
    }

    #[test]
    fn test_accepted_footprints_never_overlap() {
        let vol = DataVolume::zeros(VolumeKind::Cube, (40, 80, 80));
        let mut seg = Array2::<i32>::zeros((80, 80));
        seg.slice_mut(s![30..45, 25..50]).fill(7);
        let initial = OccupancyMask::from_segmentation(&seg, 40);
        let mut occ = initial.clone();

        let sampler = gaussian_sampler(&vol, 1.2);
        let mut rng = StdRng::seed_from_u64(31337);
        let sources = sampler
            .sample_and_register(25, &mut occ, None, &vol, &mut rng)
            .unwrap();
        assert_eq!(sources.len(), 25);

        // Every footprint was free in the initial mask, and no two overlap
        let mut coverage = Array3::<u8>::zeros(vol.dim());
        for src in &sources {
            let cand = Candidate {
                x: src.x,
                y: src.y,
                w: src.w,
                flux: src.flux,
            };
            let win = sampler.footprint(&cand, vol.dim());
            assert!(initial.is_free(&win));
            let mut region =
                coverage.slice_mut(s![win.w.clone(), win.y.clone(), win.x.clone()]);
            assert!(region.iter().all(|&c| c == 0));
            region.fill(1);
        }
        assert_eq!(
            occ.occupied_count(),
            initial.occupied_count() + coverage.iter().filter(|&&c| c > 0).count()
        );
    }

    #[test]
    fn test_full_mask_fails_with_cap() {
        let vol = DataVolume::image(Array2::zeros((50, 50)));
        let mut occ = OccupancyMask::from_segmentation(&Array2::ones((50, 50)), 1);
        let sampler = gaussian_sampler(&vol, 1.0).with_max_attempts(Some(100));
        let mut rng = StdRng::seed_from_u64(1);
        let err = sampler
            .sample_and_register(3, &mut occ, None, &vol, &mut rng)
            .unwrap_err();
        assert_eq!(
            err,
            PlacementError::InsufficientSpace {
                placed: 0,
                requested: 3,
                attempts: 100
            }
        );
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let vol = DataVolume::zeros(VolumeKind::Cube, (30, 60, 60));
        let sampler = gaussian_sampler(&vol, 1.0);
        let run = |seed| {
            let mut occ = OccupancyMask::empty_like(&vol);
            let mut rng = StdRng::seed_from_u64(seed);
            sampler
                .sample_and_register(5, &mut occ, None, &vol, &mut rng)
                .unwrap()
        };
        assert_eq!(run(3), run(3));
        assert_ne!(run(3), run(4));
    }
}
