//! Recovery runs with in-process detectors standing in for the external finder

mod common;

use approx::assert_relative_eq;
use common::{blank_image, empty_segmap, init_logging, write_single_plane};
use injector::io::read_table;
use injector::recovery::{
    read_detections, Detection, RecoveryConfig, RecoveryDriver, RecoveryError, SENTINEL,
};
use injector::SourceDetector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Reports every mock exactly where it was injected
struct CatalogEcho {
    catalog: PathBuf,
    calls: usize,
}

impl SourceDetector for CatalogEcho {
    fn detect(&mut self, image: &Path) -> Result<Vec<Detection>, RecoveryError> {
        assert!(image.exists());
        self.calls += 1;
        read_detections(&self.catalog)
    }
}

/// Finds nothing
struct Blind;

impl SourceDetector for Blind {
    fn detect(&mut self, _image: &Path) -> Result<Vec<Detection>, RecoveryError> {
        Ok(Vec::new())
    }
}

fn driver(dir: &TempDir, iterations: usize, num: usize) -> RecoveryDriver {
    let config = RecoveryConfig {
        iterations,
        num,
        flush_every: 2,
        output_dir: dir.path().join("work"),
        max_attempts: Some(100_000),
        ..RecoveryConfig::default()
    };
    RecoveryDriver {
        image: blank_image(dir.path(), "white.fits", (80, 80)),
        segmap: empty_segmap(dir.path(), "seg.fits", (80, 80)),
        badmask: None,
        expmap: None,
        results: dir.path().join("completeness.txt"),
        config,
    }
}

#[test]
fn test_perfect_detector_recovers_everything() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let driver = driver(&dir, 3, 5);
    let mut detector = CatalogEcho {
        catalog: dir.path().join("work").join("cmocks_white_catalogue.txt"),
        calls: 0,
    };

    let summary = driver
        .run(&mut detector, &mut StdRng::seed_from_u64(21))
        .unwrap();
    assert_eq!(detector.calls, 3);
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.injected, 15);
    assert_eq!(summary.recovered, 15);
    assert_relative_eq!(summary.completeness(), 1.0);
    assert_eq!(summary.rows_written, 15);

    let rows = read_table(&driver.results, 10).unwrap();
    assert_eq!(rows.len(), 15);
    for row in &rows {
        assert_eq!(row[5], 1.0);
        assert_eq!((row[6], row[7]), (row[0], row[1]));
        assert_relative_eq!(row[9], row[4], epsilon = 1e-9);
        assert!(row[4] > 23.0 - 1e-9 && row[4] < 29.0 + 1e-9);
        // No exposure map given
        assert_eq!(row[2], SENTINEL);
    }
}

#[test]
fn test_missed_sources_use_sentinels_and_exposure() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut driver = driver(&dir, 2, 4);

    let expmap = dir.path().join("expmap.fits");
    write_single_plane(&expmap, &[80, 80], &vec![3600.0; 80 * 80]);
    driver.expmap = Some(expmap);

    let summary = driver
        .run(&mut Blind, &mut StdRng::seed_from_u64(4))
        .unwrap();
    assert_eq!(summary.injected, 8);
    assert_eq!(summary.recovered, 0);
    assert_eq!(summary.completeness(), 0.0);

    let rows = read_table(&driver.results, 10).unwrap();
    assert_eq!(rows.len(), 8);
    for row in &rows {
        assert_eq!(row[2], 3600.0);
        assert_eq!(row[5], 0.0);
        assert_eq!(&row[6..], &[SENTINEL; 4]);
    }
}

#[test]
fn test_runs_append_to_the_same_results() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let driver = driver(&dir, 1, 3);

    let mut rng = StdRng::seed_from_u64(8);
    driver.run(&mut Blind, &mut rng).unwrap();
    driver.run(&mut Blind, &mut rng).unwrap();
    assert_eq!(read_table(&driver.results, 10).unwrap().len(), 6);
}

#[test]
fn test_iterations_can_be_driven_one_at_a_time() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let driver = driver(&dir, 4, 2);
    let mut table = driver.table();
    let mut rng = StdRng::seed_from_u64(13);

    let (injected, recovered) = driver
        .run_iteration(0, &mut Blind, None, &mut table, &mut rng)
        .unwrap();
    assert_eq!((injected, recovered), (2, 0));
    // flush_every is 2, so the first iteration stays buffered
    assert_eq!(table.pending().len(), 2);
    assert!(!driver.results.exists());

    driver
        .run_iteration(1, &mut Blind, None, &mut table, &mut rng)
        .unwrap();
    assert!(table.pending().is_empty());
    assert_eq!(table.finish().unwrap(), 4);
}

#[test]
fn test_progress_callback_sees_running_totals() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let driver = driver(&dir, 3, 2);

    let mut seen = Vec::new();
    let summary = driver
        .run_with(&mut Blind, &mut StdRng::seed_from_u64(6), |iteration, totals| {
            seen.push((iteration, totals.iterations, totals.injected));
        })
        .unwrap();

    assert_eq!(seen, vec![(0, 1, 2), (1, 2, 4), (2, 3, 6)]);
    assert_eq!(summary.rows_written, 6);
    assert_eq!(read_table(&driver.results, 10).unwrap().len(), 6);
}
