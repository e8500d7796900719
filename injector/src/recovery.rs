//! Completeness measurement by repeated injection and detection.
//!
//! Every iteration injects a fresh batch of continuum mocks into the
//! original image, runs an external source finder on the result and
//! cross-matches each mock against the detections. Results accumulate in a
//! whitespace table that is appended to periodically, so long runs can be
//! inspected (or interrupted) without losing everything.

use log::{debug, info, warn};
use ndarray::Array2;
use rand::Rng;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::io::catalog::{read_table, CatalogError};
use crate::io::fits::read_plane;
use crate::pipeline::{ContinuumMockConfig, ContinuumMockJob};
use crate::placement::{flux_to_mag, MockSource};
use crate::profile::Normalization;
use crate::InjectError;

/// Maximum center distance, in pixels, for a detection to count as recovered
pub const MATCH_RADIUS_PX: f64 = 1.0;

/// Value written for quantities that do not exist (undetected, no map)
pub const SENTINEL: f64 = -1.0;

/// Zero point of the white-light reconstructed image
pub const DEFAULT_ZERO_POINT: f64 = 28.35665;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Recovery I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot read detections: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Detection command is empty")]
    EmptyCommand,
    #[error("Detection command `{command}` failed with {status}: {stderr}")]
    DetectorFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("Detection command produced no catalog at {}", .0.display())]
    MissingCatalog(PathBuf),
}

/// A source reported by the external finder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
}

/// Read a detection catalog with `x y flux` in its first three columns
pub fn read_detections<P: AsRef<Path>>(path: P) -> Result<Vec<Detection>, RecoveryError> {
    Ok(read_table(path, 3)?
        .into_iter()
        .map(|row| Detection {
            x: row[0],
            y: row[1],
            flux: row[2],
        })
        .collect())
}

/// Nearest detection to `(x, y)`, if it lies within [`MATCH_RADIUS_PX`]
pub fn cross_match(x: f64, y: f64, detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .map(|det| ((det.x - x).hypot(det.y - y), det))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .filter(|(distance, _)| *distance < MATCH_RADIUS_PX)
        .map(|(_, det)| det)
}

/// One injected source and what became of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryRecord {
    pub mock_x: f64,
    pub mock_y: f64,
    /// Exposure map value under the source, or [`SENTINEL`]
    pub mock_exposure: f64,
    pub mock_flux: f64,
    pub mock_mag: f64,
    pub detected: bool,
    pub det_x: f64,
    pub det_y: f64,
    pub det_flux: f64,
    pub det_mag: f64,
}

impl RecoveryRecord {
    pub fn new(
        source: &MockSource,
        detections: &[Detection],
        exposure_map: Option<&Array2<f64>>,
        zero_point: f64,
    ) -> Self {
        // Truncation toward zero picks the pixel the center falls in
        let mock_exposure = exposure_map
            .and_then(|map| map.get((source.y as usize, source.x as usize)).copied())
            .unwrap_or(SENTINEL);

        let matched = cross_match(source.x, source.y, detections);
        let (det_x, det_y, det_flux, det_mag) = match matched {
            Some(det) => (det.x, det.y, det.flux, flux_to_mag(det.flux, zero_point)),
            None => (SENTINEL, SENTINEL, SENTINEL, SENTINEL),
        };

        Self {
            mock_x: source.x,
            mock_y: source.y,
            mock_exposure,
            mock_flux: source.flux,
            mock_mag: flux_to_mag(source.flux, zero_point),
            detected: matched.is_some(),
            det_x,
            det_y,
            det_flux,
            det_mag,
        }
    }

    /// Whitespace row in results-table column order
    pub fn to_row(&self) -> String {
        format!(
            "{:?} {:?} {:?} {:?} {:?} {} {:?} {:?} {:?} {:?}",
            self.mock_x,
            self.mock_y,
            self.mock_exposure,
            self.mock_flux,
            self.mock_mag,
            u8::from(self.detected),
            self.det_x,
            self.det_y,
            self.det_flux,
            self.det_mag
        )
    }
}

/// Column names of the results table
pub const RESULT_COLUMNS: [&str; 10] = [
    "mockxc", "mockyc", "mockexp", "mockflux", "mockmag", "sexdet", "sexxc", "sexyc", "sexflux",
    "sexmag",
];

/// Buffered results table, appended to its file every `flush_every`
/// iterations. Rows carry no header, so consecutive runs can share a file.
#[derive(Debug)]
pub struct RecoveryTable {
    path: PathBuf,
    flush_every: usize,
    pending: Vec<RecoveryRecord>,
    iterations_pending: usize,
    rows_written: usize,
}

impl RecoveryTable {
    pub fn new<P: Into<PathBuf>>(path: P, flush_every: usize) -> Self {
        Self {
            path: path.into(),
            flush_every: flush_every.max(1),
            pending: Vec::new(),
            iterations_pending: 0,
            rows_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records buffered but not yet on disk
    pub fn pending(&self) -> &[RecoveryRecord] {
        &self.pending
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Add the records of one iteration, flushing when the interval is reached
    pub fn push_iteration(&mut self, records: Vec<RecoveryRecord>) -> Result<(), RecoveryError> {
        self.pending.extend(records);
        self.iterations_pending += 1;
        if self.iterations_pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Append every buffered record to the file
    pub fn flush(&mut self) -> Result<(), RecoveryError> {
        self.iterations_pending = 0;
        if self.pending.is_empty() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in &self.pending {
            writeln!(writer, "{}", record.to_row())?;
        }
        writer.flush()?;

        debug!(
            "Appended {} rows to {}",
            self.pending.len(),
            self.path.display()
        );
        self.rows_written += self.pending.len();
        self.pending.clear();
        Ok(())
    }

    /// Flush what is left and report the total number of rows written
    pub fn finish(mut self) -> Result<usize, RecoveryError> {
        self.flush()?;
        Ok(self.rows_written)
    }
}

/// External source finder run on each injected image.
pub trait SourceDetector {
    fn detect(&mut self, image: &Path) -> Result<Vec<Detection>, RecoveryError>;
}

/// Runs a command line and reads the catalog it leaves behind.
///
/// Arguments may contain `{image}` (replaced by the injected image path)
/// and `{catalog}` (replaced by the expected catalog path). The command is
/// split on whitespace and run directly, without a shell.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    catalog: PathBuf,
}

impl CommandDetector {
    pub fn new<P: Into<PathBuf>>(command: &str, catalog: P) -> Result<Self, RecoveryError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(RecoveryError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
            catalog: catalog.into(),
        })
    }

    pub fn catalog(&self) -> &Path {
        &self.catalog
    }

    /// Arguments with placeholders filled in for `image`
    pub fn expand_args(&self, image: &Path) -> Vec<String> {
        let image = image.to_string_lossy();
        let catalog = self.catalog.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{image}", &image).replace("{catalog}", &catalog))
            .collect()
    }
}

impl SourceDetector for CommandDetector {
    fn detect(&mut self, image: &Path) -> Result<Vec<Detection>, RecoveryError> {
        // A catalog left over from the previous iteration must not be reused
        if self.catalog.exists() {
            fs::remove_file(&self.catalog)?;
        }

        let args = self.expand_args(image);
        let command_line = format!("{} {}", self.program, args.join(" "));
        debug!("Running detector: {}", command_line);

        let output = Command::new(&self.program).args(&args).output()?;
        if !output.status.success() {
            return Err(RecoveryError::DetectorFailed {
                command: command_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !self.catalog.exists() {
            return Err(RecoveryError::MissingCatalog(self.catalog.clone()));
        }

        read_detections(&self.catalog)
    }
}

/// Parameters of a recovery run.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub iterations: usize,
    /// Injected magnitude range
    pub mag_range: (f64, f64),
    pub zero_point: f64,
    /// Mocks per iteration
    pub num: usize,
    pub fill: f64,
    pub spatial_fwhm: f64,
    pub exponential: bool,
    pub exp_scale: f64,
    /// Iterations between appends to the results file
    pub flush_every: usize,
    pub prefix: String,
    pub output_dir: PathBuf,
    pub max_attempts: Option<u64>,
    pub normalization: Normalization,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            mag_range: (23.0, 29.0),
            zero_point: DEFAULT_ZERO_POINT,
            num: 80,
            fill: 10.0,
            spatial_fwhm: 3.0,
            exponential: false,
            exp_scale: 1.3,
            flush_every: 10,
            prefix: "cmocks".to_string(),
            output_dir: PathBuf::from("."),
            max_attempts: None,
            normalization: Normalization::default(),
        }
    }
}

impl RecoveryConfig {
    /// Continuum injection settings used for every iteration
    pub fn continuum_config(&self) -> ContinuumMockConfig {
        let mut config = ContinuumMockConfig::new(self.mag_range);
        config.num = self.num;
        config.zero_point = Some(self.zero_point);
        config.spatial_fwhm = self.spatial_fwhm;
        config.exponential = self.exponential;
        config.exp_scale = self.exp_scale;
        config.fill = self.fill;
        config.prefix = self.prefix.clone();
        config.output_dir = self.output_dir.clone();
        config.max_attempts = self.max_attempts;
        config.normalization = self.normalization;
        config
    }
}

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub iterations: usize,
    pub injected: usize,
    pub recovered: usize,
    /// Rows appended to the results table by this run
    pub rows_written: usize,
}

impl RecoverySummary {
    /// Fraction of injected sources that were recovered
    pub fn completeness(&self) -> f64 {
        if self.injected == 0 {
            0.0
        } else {
            self.recovered as f64 / self.injected as f64
        }
    }
}

/// Inputs and settings of a recovery run.
#[derive(Debug, Clone)]
pub struct RecoveryDriver {
    pub image: PathBuf,
    pub segmap: PathBuf,
    pub badmask: Option<PathBuf>,
    pub expmap: Option<PathBuf>,
    pub results: PathBuf,
    pub config: RecoveryConfig,
}

impl RecoveryDriver {
    fn job(&self) -> ContinuumMockJob {
        ContinuumMockJob {
            image: self.image.clone(),
            segmap: self.segmap.clone(),
            badmask: self.badmask.clone(),
            config: self.config.continuum_config(),
        }
    }

    /// Load the exposure map, if one is configured
    pub fn load_exposure_map(&self) -> Result<Option<Array2<f64>>, InjectError> {
        match &self.expmap {
            Some(path) => Ok(Some(read_plane(path)?)),
            None => {
                warn!("No exposure map given; exposure column will hold {}", SENTINEL);
                Ok(None)
            }
        }
    }

    pub fn table(&self) -> RecoveryTable {
        RecoveryTable::new(&self.results, self.config.flush_every)
    }

    /// Inject, detect and cross-match once. Returns the number of injected
    /// and recovered sources.
    pub fn run_iteration<D, R>(
        &self,
        iteration: usize,
        detector: &mut D,
        exposure_map: Option<&Array2<f64>>,
        table: &mut RecoveryTable,
        rng: &mut R,
    ) -> Result<(usize, usize), InjectError>
    where
        D: SourceDetector + ?Sized,
        R: Rng + ?Sized,
    {
        debug!("Iteration {}", iteration);
        let output = self.job().run(rng)?;
        let detections = detector.detect(&output.paths.product)?;

        let records: Vec<RecoveryRecord> = output
            .sources
            .iter()
            .map(|src| RecoveryRecord::new(src, &detections, exposure_map, self.config.zero_point))
            .collect();
        let recovered = records.iter().filter(|rec| rec.detected).count();
        debug!(
            "Iteration {}: {} detections, {} of {} mocks recovered",
            iteration,
            detections.len(),
            recovered,
            records.len()
        );

        let injected = records.len();
        table.push_iteration(records)?;
        Ok((injected, recovered))
    }

    /// Run every configured iteration and flush the table at the end
    pub fn run<D, R>(&self, detector: &mut D, rng: &mut R) -> Result<RecoverySummary, InjectError>
    where
        D: SourceDetector + ?Sized,
        R: Rng + ?Sized,
    {
        self.run_with(detector, rng, |_, _| {})
    }

    /// As [`RecoveryDriver::run`], calling `on_iteration` with the iteration
    /// index and the running totals after every iteration
    pub fn run_with<D, R, F>(
        &self,
        detector: &mut D,
        rng: &mut R,
        mut on_iteration: F,
    ) -> Result<RecoverySummary, InjectError>
    where
        D: SourceDetector + ?Sized,
        R: Rng + ?Sized,
        F: FnMut(usize, &RecoverySummary),
    {
        let exposure_map = self.load_exposure_map()?;
        let mut table = self.table();
        let mut summary = RecoverySummary::default();

        for iteration in 0..self.config.iterations {
            let (injected, recovered) =
                self.run_iteration(iteration, detector, exposure_map.as_ref(), &mut table, rng)?;
            summary.iterations += 1;
            summary.injected += injected;
            summary.recovered += recovered;
            on_iteration(iteration, &summary);
        }
        summary.rows_written = table.finish()?;

        info!(
            "Recovered {} of {} mocks over {} iterations ({:.1}%)",
            summary.recovered,
            summary.injected,
            summary.iterations,
            100.0 * summary.completeness()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ProfileKind, SourceShape};
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn mock(x: f64, y: f64, flux: f64) -> MockSource {
        MockSource {
            x,
            y,
            w: None,
            flux,
            shape: SourceShape::image(1.27),
            kind: ProfileKind::Gaussian,
        }
    }

    fn det(x: f64, y: f64, flux: f64) -> Detection {
        Detection { x, y, flux }
    }

    #[test]
    fn test_match_radius_is_exclusive() {
        let detections = [det(10.0, 10.0, 1.0)];
        assert!(cross_match(10.99, 10.0, &detections).is_some());
        assert!(cross_match(11.0, 10.0, &detections).is_none());
        assert!(cross_match(10.6, 10.6, &detections).is_some());
        assert!(cross_match(10.8, 10.8, &detections).is_none());
    }

    #[test]
    fn test_nearest_detection_wins() {
        let detections = [det(20.5, 20.0, 1.0), det(20.1, 20.1, 2.0), det(5.0, 5.0, 3.0)];
        let matched = cross_match(20.0, 20.0, &detections).unwrap();
        assert_eq!(matched.flux, 2.0);
        assert!(cross_match(40.0, 40.0, &[]).is_none());
    }

    #[test]
    fn test_unmatched_record_uses_sentinels() {
        let record = RecoveryRecord::new(&mock(30.5, 41.2, 1.0), &[], None, DEFAULT_ZERO_POINT);
        assert!(!record.detected);
        assert_eq!(record.mock_exposure, SENTINEL);
        assert_eq!(
            (record.det_x, record.det_y, record.det_flux, record.det_mag),
            (-1.0, -1.0, -1.0, -1.0)
        );
        assert_relative_eq!(record.mock_mag, DEFAULT_ZERO_POINT, epsilon = 1e-12);
        assert_eq!(record.to_row(), "30.5 41.2 -1.0 1.0 28.35665 0 -1.0 -1.0 -1.0 -1.0");
    }

    #[test]
    fn test_matched_record_reads_exposure_at_truncated_center() {
        let exposure = Array2::from_shape_fn((50, 50), |(y, x)| (100 * y + x) as f64);
        let source = mock(12.9, 30.2, 10.0);
        let detections = [det(13.1, 30.0, 8.0)];

        let record = RecoveryRecord::new(&source, &detections, Some(&exposure), 25.0);
        assert!(record.detected);
        assert_eq!(record.mock_exposure, 3012.0);
        assert_eq!((record.det_x, record.det_y, record.det_flux), (13.1, 30.0, 8.0));
        assert_relative_eq!(record.mock_mag, 22.5, epsilon = 1e-12);
        assert_relative_eq!(record.det_mag, 25.0 - 2.5 * 8f64.log10(), epsilon = 1e-12);
    }

    #[test]
    fn test_table_flushes_periodically_and_at_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.txt");
        let mut table = RecoveryTable::new(&path, 2);
        let record = RecoveryRecord::new(&mock(25.0, 25.0, 2.0), &[], None, 28.0);

        table.push_iteration(vec![record; 3]).unwrap();
        assert!(!path.exists());
        assert_eq!(table.pending().len(), 3);

        table.push_iteration(vec![record; 2]).unwrap();
        assert_eq!(read_table(&path, 10).unwrap().len(), 5);
        assert!(table.pending().is_empty());

        // A trailing partial interval is not lost
        table.push_iteration(vec![record]).unwrap();
        assert_eq!(table.finish().unwrap(), 6);
        assert_eq!(read_table(&path, 10).unwrap().len(), 6);
    }

    #[test]
    fn test_table_appends_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.txt");
        fs::write(&path, "1 2 3 4 5 1 6 7 8 9\n").unwrap();

        let mut table = RecoveryTable::new(&path, 10);
        let record = RecoveryRecord::new(&mock(25.0, 25.0, 2.0), &[], None, 28.0);
        table.push_iteration(vec![record]).unwrap();
        table.finish().unwrap();

        let rows = read_table(&path, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], 1.0);
        assert_eq!(rows[1][0], 25.0);
    }

    #[test]
    fn test_command_placeholders() {
        let detector = CommandDetector::new(
            "sex {image} -CATALOG_NAME {catalog} -c default.sex",
            "/tmp/catalogue.txt",
        )
        .unwrap();
        assert_eq!(
            detector.expand_args(Path::new("/data/cmocks_image.fits")),
            vec![
                "/data/cmocks_image.fits",
                "-CATALOG_NAME",
                "/tmp/catalogue.txt",
                "-c",
                "default.sex"
            ]
        );
        assert!(matches!(
            CommandDetector::new("   ", "x.txt"),
            Err(RecoveryError::EmptyCommand)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_detector_reads_catalog() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("found.txt");
        fs::write(&source, "# x y flux\n10.0 11.0 5.5\n").unwrap();
        let catalog = dir.path().join("catalogue.txt");
        fs::write(&catalog, "stale 1 2\n").unwrap();

        let command = format!("cp {} {{catalog}}", source.display());
        let mut detector = CommandDetector::new(&command, &catalog).unwrap();
        let detections = detector.detect(Path::new("unused.fits")).unwrap();
        assert_eq!(detections, vec![det(10.0, 11.0, 5.5)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_detector_reports_failures() {
        let dir = TempDir::new().unwrap();
        let catalog = dir.path().join("catalogue.txt");

        let mut failing = CommandDetector::new("false {image}", &catalog).unwrap();
        assert!(matches!(
            failing.detect(Path::new("image.fits")),
            Err(RecoveryError::DetectorFailed { .. })
        ));

        let mut silent = CommandDetector::new("true", &catalog).unwrap();
        assert!(matches!(
            silent.detect(Path::new("image.fits")),
            Err(RecoveryError::MissingCatalog(_))
        ));
    }

    #[test]
    fn test_recovery_defaults() {
        let config = RecoveryConfig::default();
        assert_eq!(config.num, 80);
        assert_eq!(config.fill, 10.0);
        assert_eq!(config.flush_every, 10);

        let continuum = config.continuum_config();
        assert_eq!(continuum.zero_point, Some(28.35665));
        assert_eq!(continuum.flux_range, (23.0, 29.0));
        assert_eq!(continuum.spatial_fwhm, 3.0);
        assert_eq!(continuum.exp_scale, 1.3);
        assert!(!continuum.exponential);
        assert_eq!(continuum.normalization, Normalization::Analytic);
    }

    #[test]
    fn test_legacy_normalization_reaches_continuum_runs() {
        let config = RecoveryConfig {
            exponential: true,
            normalization: Normalization::GaussianLegacy,
            ..RecoveryConfig::default()
        };
        let injection = config.continuum_config().injection_config();
        assert_eq!(injection.normalization, Normalization::GaussianLegacy);
    }

    #[test]
    fn test_completeness() {
        let summary = RecoverySummary {
            iterations: 2,
            injected: 160,
            recovered: 120,
            rows_written: 160,
        };
        assert_relative_eq!(summary.completeness(), 0.75);
    }
}
