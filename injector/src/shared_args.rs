use crate::profile::Normalization;
use clap::Parser;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

/// Parse a range string in format "min,max"
fn parse_range(s: &str) -> Result<(f64, f64), String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return Err("Range must be in format 'min,max'".to_string());
    }

    let min = parts[0]
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("Invalid minimum value: {}", parts[0].trim()))?;
    let max = parts[1]
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("Invalid maximum value: {}", parts[1].trim()))?;

    if !(min.is_finite() && max.is_finite()) {
        return Err("Range bounds must be finite".to_string());
    }
    if min >= max {
        return Err(format!("Range minimum {} must be below maximum {}", min, max));
    }

    Ok((min, max))
}

/// Closed numeric range given on the command line as "min,max"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeArg(pub f64, pub f64);

impl RangeArg {
    pub fn as_tuple(&self) -> (f64, f64) {
        (self.0, self.1)
    }
}

impl std::str::FromStr for RangeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_range(s).map(|(min, max)| RangeArg(min, max))
    }
}

impl std::fmt::Display for RangeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.0, self.1)
    }
}

/// Common arguments shared across the injection binaries
///
/// Options without a default here fall back to the defaults of the job
/// they are applied to.
#[derive(Parser, Debug, Clone)]
pub struct SharedInjectionArgs {
    /// Segmentation map of real sources (same spatial shape as the data)
    #[arg(long)]
    pub segmap: PathBuf,

    /// Bad-pixel mask; pixels with values > 0 are never used
    #[arg(long)]
    pub badmask: Option<PathBuf>,

    /// Seeing FWHM in pixels
    #[arg(long)]
    pub spatial_fwhm: Option<f64>,

    /// Profile support in sigmas (larger is more accurate but slower)
    #[arg(long)]
    pub fill: Option<f64>,

    /// Directory for the injected product and catalog
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Seed for reproducible placement; random when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Give up after this many consecutive rejected draws for one source
    #[arg(long)]
    pub max_attempts: Option<u64>,

    /// Normalize exponential profiles with the Gaussian constant, as older
    /// mock runs did
    #[arg(long, default_value_t = false)]
    pub legacy_exp_norm: bool,

    /// Enable debug output
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl SharedInjectionArgs {
    pub fn normalization(&self) -> Normalization {
        if self.legacy_exp_norm {
            Normalization::GaussianLegacy
        } else {
            Normalization::Analytic
        }
    }
}

/// Build the placement RNG, drawing and logging a seed when none is given
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    let seed = seed.unwrap_or_else(rand::random::<u64>);
    info!("Random seed: {}", seed);
    StdRng::seed_from_u64(seed)
}

/// Initialize the logger with an `info` default, or `debug` when requested
///
/// `RUST_LOG` still takes precedence over the default.
pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}
