//! Inject mock emission lines into a spectral cube
//!
//! Line fluxes are drawn uniformly in log space between the given limits and
//! rendered as 3D Gaussians (or exponential disks with a Gaussian spectral
//! profile). The injected cube, written next to a catalog of the mocks, can
//! then be run through the line finder to measure its completeness.

use clap::Parser;
use injector::pipeline::{LineMockConfig, LineMockJob};
use injector::shared_args::{init_logging, seeded_rng, RangeArg, SharedInjectionArgs};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mocklines",
    about = "Injects mock emission lines into a FITS cube",
    long_about = None
)]
struct Args {
    /// Input cube (primary HDU, or DATA in HDU 1 with optional variance in HDU 2)
    cube: PathBuf,

    #[command(flatten)]
    shared: SharedInjectionArgs,

    /// Line flux limits in cube units (format: "min,max")
    #[arg(long)]
    flux_range: RangeArg,

    /// Number of mock lines
    #[arg(long)]
    num: Option<usize>,

    /// Slice range for line centers (format: "min,max"); 10 slices from each
    /// end when omitted
    #[arg(long)]
    wave_limits: Option<RangeArg>,

    /// Line FWHM in slices
    #[arg(long)]
    spectral_fwhm: Option<f64>,

    /// Use exponential spatial profiles with this scale length in pixels
    #[arg(long)]
    exp_scale: Option<f64>,

    /// Prefix for output file names
    #[arg(long, default_value = "mocks")]
    prefix: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.shared.debug);

    let mut config = LineMockConfig::new(args.flux_range.as_tuple());
    if let Some(num) = args.num {
        config.num = num;
    }
    if let Some(fwhm) = args.shared.spatial_fwhm {
        config.spatial_fwhm = fwhm;
    }
    if let Some(fwhm) = args.spectral_fwhm {
        config.spectral_fwhm = fwhm;
    }
    if let Some(fill) = args.shared.fill {
        config.fill = fill;
    }
    config.wave_limits = args.wave_limits.map(|range| range.as_tuple());
    config.exp_scale = args.exp_scale;
    config.prefix = args.prefix.clone();
    config.output_dir = args.shared.output_dir.clone();
    config.max_attempts = args.shared.max_attempts;
    config.normalization = args.shared.normalization();

    let job = LineMockJob {
        cube: args.cube,
        segmap: args.shared.segmap.clone(),
        badmask: args.shared.badmask.clone(),
        config,
    };

    let mut rng = seeded_rng(args.shared.seed);
    let output = job.run(&mut rng)?;

    println!(
        "Injected {} lines into {}",
        output.sources.len(),
        output.paths.product.display()
    );
    println!("Catalog: {}", output.paths.catalog.display());

    Ok(())
}
