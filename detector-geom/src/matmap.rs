//! JSON persistence for alignment-matrix maps.
//!
//! The interchange format is a JSON object mapping geometry path to a
//! flattened 16-element row-major array. Every stage of the alignment
//! pipeline reads and writes this one format.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::Matrix4;
use thiserror::Error;
use tracing::warn;

use crate::path::GeoPath;

/// Alignment matrices keyed by geometry path. BTreeMap keeps file output
/// sorted and diffs stable.
pub type MatrixMap = BTreeMap<GeoPath, Matrix4<f64>>;

#[derive(Debug, Error)]
pub enum MatrixIoError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("matrix for {geo_path} has {len} elements, expected 16")]
    BadShape { geo_path: GeoPath, len: usize },
}

/// Load a matrix map from a JSON file.
pub fn load_matrices(path: &Path) -> Result<MatrixMap, MatrixIoError> {
    let text = fs::read_to_string(path).map_err(|source| MatrixIoError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: BTreeMap<GeoPath, Vec<f64>> =
        serde_json::from_str(&text).map_err(|source| MatrixIoError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    let mut map = MatrixMap::new();
    for (geo_path, values) in raw {
        if values.len() != 16 {
            return Err(MatrixIoError::BadShape {
                geo_path,
                len: values.len(),
            });
        }
        map.insert(geo_path, Matrix4::from_row_slice(&values));
    }
    Ok(map)
}

/// Save a matrix map as JSON, creating the parent directory if needed.
/// Overwriting an existing file is allowed but logged.
pub fn save_matrices(map: &MatrixMap, path: &Path) -> Result<(), MatrixIoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| MatrixIoError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    if path.exists() {
        warn!(path = %path.display(), "overwriting existing matrix file");
    }

    let raw: BTreeMap<&GeoPath, Vec<f64>> = map
        .iter()
        .map(|(geo_path, m)| (geo_path, flatten_row_major(m)))
        .collect();
    let text = serde_json::to_string_pretty(&raw).map_err(|source| MatrixIoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| MatrixIoError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Row-major flattening matching the on-disk layout.
pub fn flatten_row_major(m: &Matrix4<f64>) -> Vec<f64> {
    (0..4).flat_map(|r| (0..4).map(move |c| m[(r, c)])).collect()
}
