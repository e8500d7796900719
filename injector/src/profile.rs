//! Analytic source profiles for mock injection.
//!
//! Two spatial shapes are supported:
//!
//! - **Gaussian** (point sources): the profile already represents the
//!   seeing-blurred PSF, so it is evaluated as-is.
//! - **Exponential** (extended sources): separable in the spatial axes,
//!   `exp(-(|dx|/σx + |dy|/σy))`. This is an L1 kernel, not a radial one,
//!   and is later convolved with the seeing PSF.
//!
//! Cubes add a Gaussian spectral term `dw²/(2σw²)` to either shape.
//!
//! Profiles are evaluated at integer lattice points (pixel centers) inside a
//! support window of `fill` sigmas around the source center.

use std::f64::consts::{LN_2, PI};

/// Convert a Gaussian full width at half maximum into a standard deviation.
///
/// `σ = FWHM / (2 √(2 ln 2))`, i.e. σ ≈ FWHM / 2.3548.
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    fwhm / (2.0 * (2.0 * LN_2).sqrt())
}

/// Spatial shape of a mock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// Gaussian point source
    Gaussian,
    /// Separable exponential disk, convolved with the seeing afterwards
    Exponential,
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileKind::Gaussian => write!(f, "gaussian"),
            ProfileKind::Exponential => write!(f, "exponential"),
        }
    }
}

/// How the exponential profile is normalized.
///
/// Gaussian profiles always use the Gaussian integral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// Use the integral of the profile actually evaluated, so the injected
    /// total matches the catalog flux.
    #[default]
    Analytic,
    /// Reuse the Gaussian constant for exponential sources. Injected totals
    /// are then `2/π` of the catalog flux, as in older mock runs.
    GaussianLegacy,
}

/// Width parameters of a source, in pixels (spatial) and slices (spectral).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceShape {
    pub sigma_x: f64,
    pub sigma_y: f64,
    /// Spectral width, present only for cube sources
    pub sigma_w: Option<f64>,
}

impl SourceShape {
    /// Circular 2D shape
    pub fn image(sigma: f64) -> Self {
        Self {
            sigma_x: sigma,
            sigma_y: sigma,
            sigma_w: None,
        }
    }

    /// Circular spatial shape with a spectral width
    pub fn cube(sigma: f64, sigma_w: f64) -> Self {
        Self {
            sigma_x: sigma,
            sigma_y: sigma,
            sigma_w: Some(sigma_w),
        }
    }
}

/// A fully parameterized source profile ready for evaluation.
///
/// The normalization constant is computed once at construction so repeated
/// evaluation over a support window only pays for the exponent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    kind: ProfileKind,
    shape: SourceShape,
    norm: f64,
}

impl Profile {
    /// Build a profile carrying `flux` in total.
    pub fn new(
        kind: ProfileKind,
        shape: SourceShape,
        flux: f64,
        normalization: Normalization,
    ) -> Self {
        let SourceShape {
            sigma_x,
            sigma_y,
            sigma_w,
        } = shape;

        let spectral = sigma_w.map_or(1.0, |sw| sw * (2.0 * PI).sqrt());
        let spatial = match (kind, normalization) {
            (ProfileKind::Gaussian, _)
            | (ProfileKind::Exponential, Normalization::GaussianLegacy) => {
                sigma_x * sigma_y * 2.0 * PI
            }
            (ProfileKind::Exponential, Normalization::Analytic) => 4.0 * sigma_x * sigma_y,
        };

        Self {
            kind,
            shape,
            norm: flux / (spatial * spectral),
        }
    }

    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    pub fn shape(&self) -> &SourceShape {
        &self.shape
    }

    /// Peak brightness (value at zero offset)
    pub fn norm(&self) -> f64 {
        self.norm
    }

    /// Brightness at an offset from the source center.
    ///
    /// `dw` is ignored for 2D shapes.
    pub fn evaluate(&self, dx: f64, dy: f64, dw: f64) -> f64 {
        let SourceShape {
            sigma_x,
            sigma_y,
            sigma_w,
        } = self.shape;

        let spatial = match self.kind {
            ProfileKind::Gaussian => {
                dx * dx / (2.0 * sigma_x * sigma_x) + dy * dy / (2.0 * sigma_y * sigma_y)
            }
            ProfileKind::Exponential => dx.abs() / sigma_x + dy.abs() / sigma_y,
        };
        let spectral = sigma_w.map_or(0.0, |sw| dw * dw / (2.0 * sw * sw));

        self.norm * (-(spatial + spectral)).exp()
    }
}

/// Lattice coordinates covered by a profile along one axis.
///
/// Starts at `floor(center - fill·σ)` and steps by one while strictly below
/// `center + fill·σ`.
pub fn support(center: f64, sigma: f64, fill: f64) -> impl Iterator<Item = i64> {
    let reach = fill * sigma;
    let start = (center - reach).floor() as i64;
    let stop = center + reach;
    (start..).take_while(move |&p| (p as f64) < stop)
}
