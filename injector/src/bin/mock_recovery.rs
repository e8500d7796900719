//! Completeness measurement for continuum detection
//!
//! Repeatedly injects mock continuum sources into an image, runs an external
//! source finder on every injected image and appends one row per mock to a
//! results table. The finder is any command line that writes an `x y flux`
//! catalog; `{image}` and `{catalog}` in the command are replaced by the
//! injected image path and `--detect-catalog`.
//!
//! Usage:
//! ```text
//! mock_recovery white.fits --segmap seg.fits --results completeness.txt \
//!     --iterations 200 --detect-cmd "sex {image} -CATALOG_NAME {catalog}" \
//!     --detect-catalog found.txt
//! ```

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use injector::recovery::{CommandDetector, RecoveryConfig, RecoveryDriver, RESULT_COLUMNS};
use injector::shared_args::{init_logging, seeded_rng, RangeArg, SharedInjectionArgs};
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mock_recovery",
    about = "Measures detection completeness with repeated mock injection",
    long_about = None
)]
struct Args {
    /// Input image (primary HDU, or DATA in HDU 1)
    image: PathBuf,

    #[command(flatten)]
    shared: SharedInjectionArgs,

    /// Results table; rows are appended when it already exists
    #[arg(long)]
    results: PathBuf,

    /// Number of inject/detect iterations
    #[arg(long, default_value_t = 1)]
    iterations: usize,

    /// Detection command line, with {image} and {catalog} placeholders
    #[arg(long)]
    detect_cmd: String,

    /// Catalog written by the detection command
    #[arg(long)]
    detect_catalog: PathBuf,

    /// Exposure map sampled at each mock position
    #[arg(long)]
    expmap: Option<PathBuf>,

    /// Injected magnitude range (format: "min,max")
    #[arg(long, default_value = "23,29")]
    mag_range: RangeArg,

    /// Zero point converting fluxes to magnitudes
    #[arg(long, default_value_t = injector::recovery::DEFAULT_ZERO_POINT)]
    zero_point: f64,

    /// Mocks injected per iteration
    #[arg(long, default_value_t = 80)]
    num: usize,

    /// Inject exponential disks instead of point sources
    #[arg(long, default_value_t = false)]
    exponential: bool,

    /// Exponential scale length in pixels
    #[arg(long, default_value_t = 1.3)]
    exp_scale: f64,

    /// Iterations between appends to the results table
    #[arg(long, default_value_t = 10)]
    flush_every: usize,

    /// Prefix for the injected image and catalog
    #[arg(long, default_value = "cmocks")]
    prefix: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.shared.debug);

    let mut config = RecoveryConfig {
        iterations: args.iterations,
        mag_range: args.mag_range.as_tuple(),
        zero_point: args.zero_point,
        num: args.num,
        exponential: args.exponential,
        exp_scale: args.exp_scale,
        flush_every: args.flush_every,
        prefix: args.prefix.clone(),
        output_dir: args.shared.output_dir.clone(),
        max_attempts: args.shared.max_attempts,
        normalization: args.shared.normalization(),
        ..RecoveryConfig::default()
    };
    if let Some(fwhm) = args.shared.spatial_fwhm {
        config.spatial_fwhm = fwhm;
    }
    if let Some(fill) = args.shared.fill {
        config.fill = fill;
    }

    let driver = RecoveryDriver {
        image: args.image,
        segmap: args.shared.segmap.clone(),
        badmask: args.shared.badmask.clone(),
        expmap: args.expmap,
        results: args.results,
        config,
    };
    let mut detector = CommandDetector::new(&args.detect_cmd, &args.detect_catalog)?;
    let mut rng = seeded_rng(args.shared.seed);

    info!("Results columns: {}", RESULT_COLUMNS.join(" "));

    let pb = ProgressBar::new(driver.config.iterations as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    pb.set_message("Injecting and detecting");

    let summary = driver.run_with(&mut detector, &mut rng, |_, totals| {
        pb.set_message(format!("{} of {} recovered", totals.recovered, totals.injected));
        pb.inc(1);
    })?;
    pb.finish_with_message(format!("Completed {} iterations", summary.iterations));

    println!(
        "Recovered {} of {} mocks ({:.1}%)",
        summary.recovered,
        summary.injected,
        100.0 * summary.completeness()
    );
    println!("Wrote {} rows to {}", summary.rows_written, driver.results.display());

    Ok(())
}
