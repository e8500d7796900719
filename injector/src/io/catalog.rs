//! Plain-text catalogs
//!
//! Mock catalogs hold one accepted source per line, whitespace separated:
//! `x y w flux` for cubes and `x y flux` for images. Values are written in
//! shortest round-trip decimal form, so reading a catalog back reproduces
//! the injected parameters exactly.
//!
//! The same reader handles detection catalogs from external tools, which
//! may carry `#` comment lines.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::placement::MockSource;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}:{line}: invalid value '{value}'", .path.display())]
    InvalidValue {
        path: PathBuf,
        line: usize,
        value: String,
    },
    #[error(
        "{}:{line}: expected at least {expected} columns, found {found}",
        .path.display()
    )]
    MissingColumns {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
}

/// One catalog row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogEntry {
    pub x: f64,
    pub y: f64,
    /// Spectral center, cube catalogs only
    pub w: Option<f64>,
    pub flux: f64,
}

impl From<&MockSource> for CatalogEntry {
    fn from(source: &MockSource) -> Self {
        Self {
            x: source.x,
            y: source.y,
            w: source.w,
            flux: source.flux,
        }
    }
}

/// Format one source as a catalog line (without newline)
///
/// Values use the shortest round-trip form, in exponent notation for very
/// small or large magnitudes (`1.5e-18`).
pub fn format_entry(entry: &CatalogEntry) -> String {
    match entry.w {
        Some(w) => format!("{:?} {:?} {:?} {:?}", entry.x, entry.y, w, entry.flux),
        None => format!("{:?} {:?} {:?}", entry.x, entry.y, entry.flux),
    }
}

/// Write accepted sources in acceptance order, replacing any existing file
pub fn write_catalog<P: AsRef<Path>>(
    path: P,
    sources: &[MockSource],
) -> Result<(), CatalogError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for source in sources {
        writeln!(writer, "{}", format_entry(&CatalogEntry::from(source)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read the numeric rows of a whitespace table
///
/// Blank lines and lines starting with `#` are skipped. Every remaining row
/// must have at least `min_columns` values.
pub fn read_table<P: AsRef<Path>>(
    path: P,
    min_columns: usize,
) -> Result<Vec<Vec<f64>>, CatalogError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let row = trimmed
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|_| CatalogError::InvalidValue {
                    path: path.to_path_buf(),
                    line: index + 1,
                    value: token.to_string(),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        if row.len() < min_columns {
            return Err(CatalogError::MissingColumns {
                path: path.to_path_buf(),
                line: index + 1,
                expected: min_columns,
                found: row.len(),
            });
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Read a mock catalog written by [`write_catalog`]
///
/// Rows with four or more columns are read as `x y w flux`, three-column
/// rows as `x y flux`.
pub fn read_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<CatalogEntry>, CatalogError> {
    let rows = read_table(path, 3)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let (w, flux) = if row.len() >= 4 {
                (Some(row[2]), row[3])
            } else {
                (None, row[2])
            };
            CatalogEntry {
                x: row[0],
                y: row[1],
                w,
                flux,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ProfileKind, SourceShape};
    use std::fs;
    use tempfile::TempDir;

    fn source(x: f64, y: f64, w: Option<f64>, flux: f64) -> MockSource {
        MockSource {
            x,
            y,
            w,
            flux,
            shape: SourceShape::image(1.0),
            kind: ProfileKind::Gaussian,
        }
    }

    #[test]
    fn test_line_format() {
        let cube = CatalogEntry::from(&source(25.0, 25.5, Some(25.0), 100.0));
        assert_eq!(format_entry(&cube), "25.0 25.5 25.0 100.0");

        let image = CatalogEntry::from(&source(31.25, 40.0, None, 1.5e-18));
        assert_eq!(format_entry(&image), "31.25 40.0 1.5e-18");
    }

    #[test]
    fn test_catalog_preserves_values_exactly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mocks_cube_catalogue.txt");
        let sources = vec![
            source(20.123456789012345, 33.3, Some(17.77), 3.1415926535e-19),
            source(45.0, 21.000000000000004, Some(29.5), 7.0e-18),
        ];

        write_catalog(&path, &sources).unwrap();
        let entries = read_catalog(&path).unwrap();

        assert_eq!(entries.len(), 2);
        for (entry, src) in entries.iter().zip(&sources) {
            assert_eq!(*entry, CatalogEntry::from(src));
        }
    }

    #[test]
    fn test_empty_catalog() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none.txt");
        write_catalog(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        assert!(read_catalog(&path).unwrap().is_empty());
    }

    #[test]
    fn test_table_skips_comments_and_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("detections.txt");
        fs::write(&path, "# x y flux\n\n  10.5 12.0 3.0 extra_ignored_not\n").unwrap();
        assert!(matches!(
            read_table(&path, 3),
            Err(CatalogError::InvalidValue { line: 3, .. })
        ));

        fs::write(&path, "# x y flux\n\n10.5 12.0 3.0\n 1 2 3 4\n").unwrap();
        let rows = read_table(&path, 3).unwrap();
        assert_eq!(rows, vec![vec![10.5, 12.0, 3.0], vec![1.0, 2.0, 3.0, 4.0]]);
    }

    #[test]
    fn test_table_reports_short_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.txt");
        fs::write(&path, "1 2 3\n4 5\n").unwrap();
        let err = read_table(&path, 3).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::MissingColumns {
                line: 2,
                expected: 3,
                found: 2,
                ..
            }
        ));
    }
}
