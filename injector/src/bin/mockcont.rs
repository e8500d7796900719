//! Inject mock continuum sources into an image
//!
//! Sources are point-like Gaussians with the seeing FWHM, or exponential
//! disks convolved with the seeing. Fluxes are drawn uniformly in linear
//! flux, or uniformly in magnitude when a zero point is given.

use clap::Parser;
use injector::pipeline::{ContinuumMockConfig, ContinuumMockJob};
use injector::shared_args::{init_logging, seeded_rng, RangeArg, SharedInjectionArgs};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mockcont",
    about = "Injects mock continuum sources into a FITS image",
    long_about = None
)]
struct Args {
    /// Input image (primary HDU, or DATA in HDU 1)
    image: PathBuf,

    #[command(flatten)]
    shared: SharedInjectionArgs,

    /// Flux limits in image units, or magnitudes with --zero-point (format: "min,max")
    #[arg(long)]
    flux_range: RangeArg,

    /// Zero point turning --flux-range into a magnitude range
    #[arg(long)]
    zero_point: Option<f64>,

    /// Number of mock sources
    #[arg(long)]
    num: Option<usize>,

    /// Inject exponential disks instead of point sources
    #[arg(long, default_value_t = false)]
    exponential: bool,

    /// Exponential scale length in pixels
    #[arg(long)]
    exp_scale: Option<f64>,

    /// Prefix for output file names
    #[arg(long, default_value = "cmocks")]
    prefix: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.shared.debug);

    let mut config = ContinuumMockConfig::new(args.flux_range.as_tuple());
    if let Some(num) = args.num {
        config.num = num;
    }
    if let Some(fwhm) = args.shared.spatial_fwhm {
        config.spatial_fwhm = fwhm;
    }
    if let Some(fill) = args.shared.fill {
        config.fill = fill;
    }
    if let Some(scale) = args.exp_scale {
        config.exp_scale = scale;
    }
    config.zero_point = args.zero_point;
    config.exponential = args.exponential;
    config.prefix = args.prefix.clone();
    config.output_dir = args.shared.output_dir.clone();
    config.max_attempts = args.shared.max_attempts;
    config.normalization = args.shared.normalization();

    let job = ContinuumMockJob {
        image: args.image,
        segmap: args.shared.segmap.clone(),
        badmask: args.shared.badmask.clone(),
        config,
    };

    let mut rng = seeded_rng(args.shared.seed);
    let output = job.run(&mut rng)?;

    println!(
        "Injected {} sources into {}",
        output.sources.len(),
        output.paths.product.display()
    );
    println!("Catalog: {}", output.paths.catalog.display());
    if let Some(seg) = &output.paths.segmentation {
        println!("Updated segmentation: {}", seg.display());
    }

    Ok(())
}
