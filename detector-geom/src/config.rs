//! Static run-configuration tables.
//!
//! These files describe the detector generation and the measurement
//! campaign: which sensor pairs overlap, where the track anchor point of
//! each sector sits, and which four module volumes make up a sector. They
//! are loaded once into immutable tables and shared read-only across
//! worker threads.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix4, Point3};
use serde::Deserialize;
use thiserror::Error;

use crate::path::GeoPath;

/// Sensor pairs forming the fixed overlap ladder of one module, indexed by
/// local overlap index 0-8. Sensors 0-4 sit on the front side, 5-9 on the
/// back side; each back sensor overlaps one or two front sensors.
pub const OVERLAP_SENSOR_PAIRS: [(u8, u8); 9] = [
    (0, 5),
    (1, 5),
    (1, 6),
    (2, 6),
    (2, 7),
    (3, 7),
    (3, 8),
    (4, 8),
    (4, 9),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
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
    #[error("invalid overlap id '{key}' in {path:?}")]
    BadOverlapId { path: PathBuf, key: String },
    #[error("overlap id {id} maps to local index {local}, outside the ladder 0-8")]
    BadOverlapIndex { id: u32, local: u8 },
    #[error("invalid sector key '{key}' in {path:?}")]
    BadSectorKey { path: PathBuf, key: String },
    #[error("anchor point for sector {sector} has {len} components, expected 3 or 4")]
    BadAnchorPoint { sector: u8, len: usize },
    #[error("sector {sector} matrix has {len} elements, expected 16")]
    BadSectorMatrix { sector: u8, len: usize },
}

/// One overlap region between two sensors of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapDescriptor {
    /// Globally unique overlap ID.
    pub id: u32,
    /// Overlap index within the module, `id % 10`, always 0-8.
    pub local: u8,
    pub sensor_a: GeoPath,
    pub sensor_b: GeoPath,
    pub module: GeoPath,
}

impl OverlapDescriptor {
    /// Descriptor for overlap `id` on `module`, with sensor paths derived
    /// from the fixed ladder layout. IDs whose last digit has no ladder
    /// slot (local index 9) are rejected.
    pub fn on_module(id: u32, module: &GeoPath) -> Result<Self, ConfigError> {
        let local = (id % 10) as u8;
        let (a, b) = *OVERLAP_SENSOR_PAIRS
            .get(local as usize)
            .ok_or(ConfigError::BadOverlapIndex { id, local })?;
        Ok(OverlapDescriptor {
            id,
            local,
            sensor_a: module.sensor(a),
            sensor_b: module.sensor(b),
            module: module.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OverlapEntryRaw {
    path1: String,
    path2: String,
    #[serde(rename = "pathModule")]
    path_module: String,
}

/// All overlap regions of the detector, keyed by global overlap ID.
/// Static per detector generation.
#[derive(Debug, Clone, Default)]
pub struct OverlapTable {
    by_id: BTreeMap<u32, OverlapDescriptor>,
}

impl OverlapTable {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: BTreeMap<String, OverlapEntryRaw> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let mut by_id = BTreeMap::new();
        for (key, entry) in raw {
            let id: u32 = key.parse().map_err(|_| ConfigError::BadOverlapId {
                path: path.to_path_buf(),
                key: key.clone(),
            })?;
            let local = (id % 10) as u8;
            if usize::from(local) >= OVERLAP_SENSOR_PAIRS.len() {
                return Err(ConfigError::BadOverlapIndex { id, local });
            }
            by_id.insert(
                id,
                OverlapDescriptor {
                    id,
                    local,
                    sensor_a: GeoPath::new(entry.path1),
                    sensor_b: GeoPath::new(entry.path2),
                    module: GeoPath::new(entry.path_module),
                },
            );
        }
        Ok(OverlapTable { by_id })
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = OverlapDescriptor>) -> Self {
        OverlapTable {
            by_id: descriptors.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&OverlapDescriptor> {
        self.by_id.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OverlapDescriptor> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Descriptors grouped by their module path.
    pub fn by_module(&self) -> BTreeMap<&GeoPath, Vec<&OverlapDescriptor>> {
        let mut grouped: BTreeMap<&GeoPath, Vec<&OverlapDescriptor>> = BTreeMap::new();
        for descriptor in self.by_id.values() {
            grouped.entry(&descriptor.module).or_default().push(descriptor);
        }
        grouped
    }
}

fn parse_sector_keys<T>(
    raw: BTreeMap<String, T>,
    path: &Path,
) -> Result<BTreeMap<u8, T>, ConfigError> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let sector: u8 = key.parse().map_err(|_| ConfigError::BadSectorKey {
            path: path.to_path_buf(),
            key: key.clone(),
        })?;
        out.insert(sector, value);
    }
    Ok(out)
}

fn read_sector_json<T: for<'de> Deserialize<'de>>(
    path: &Path,
) -> Result<BTreeMap<u8, T>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: BTreeMap<String, T> =
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    parse_sector_keys(raw, path)
}

/// Load per-sector track anchor points. Each entry is a 3-vector or a
/// homogeneous 4-vector `[x, y, z, 1]`, given in the detector-local frame.
pub fn load_anchor_points(path: &Path) -> Result<BTreeMap<u8, Point3<f64>>, ConfigError> {
    let raw = read_sector_json::<Vec<f64>>(path)?;
    let mut out = BTreeMap::new();
    for (sector, values) in raw {
        if values.len() != 3 && values.len() != 4 {
            return Err(ConfigError::BadAnchorPoint {
                sector,
                len: values.len(),
            });
        }
        out.insert(sector, Point3::new(values[0], values[1], values[2]));
    }
    Ok(out)
}

/// Load the per-sector lists of module paths, ordered by increasing plane.
pub fn load_sector_paths(path: &Path) -> Result<BTreeMap<u8, Vec<GeoPath>>, ConfigError> {
    read_sector_json::<Vec<GeoPath>>(path)
}

/// Load per-sector 4x4 matrices (flattened row-major), e.g. the average
/// sensor misalignment applied after module alignment.
pub fn load_sector_matrices(path: &Path) -> Result<BTreeMap<u8, Matrix4<f64>>, ConfigError> {
    let raw = read_sector_json::<Vec<f64>>(path)?;
    let mut out = BTreeMap::new();
    for (sector, values) in raw {
        if values.len() != 16 {
            return Err(ConfigError::BadSectorMatrix {
                sector,
                len: values.len(),
            });
        }
        out.insert(sector, Matrix4::from_row_slice(&values));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("detector-geom-config-{}-{}", std::process::id(), name));
        dir
    }

    #[test]
    fn test_descriptor_local_index_from_id() {
        let module = GeoPath::new("/cave_1/det_root_0/half_0/plane_2/module_1");
        let d = OverlapDescriptor::on_module(127, &module).unwrap();
        assert_eq!(d.local, 7);
        assert_eq!(d.sensor_a, module.sensor(4));
        assert_eq!(d.sensor_b, module.sensor(8));
    }

    #[test]
    fn test_descriptor_rejects_local_index_without_ladder_slot() {
        let module = GeoPath::new("/cave_1/module_0");
        let err = OverlapDescriptor::on_module(19, &module).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BadOverlapIndex { id: 19, local: 9 }
        ));
    }

    #[test]
    fn test_table_grouping_by_module() {
        let m0 = GeoPath::new("/cave_1/module_0");
        let m1 = GeoPath::new("/cave_1/module_1");
        let table = OverlapTable::from_descriptors(
            (0..9)
                .map(|i| OverlapDescriptor::on_module(i, &m0).unwrap())
                .chain((10..19).map(|i| OverlapDescriptor::on_module(i, &m1).unwrap())),
        );
        let grouped = table.by_module();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&m0].len(), 9);
        assert_eq!(grouped[&m1].len(), 9);
    }

    #[test]
    fn test_load_overlap_table() {
        let path = temp_file("overlaps.json");
        std::fs::write(
            &path,
            r#"{
                "0": {
                    "path1": "/cave_1/module_0/sensor_0",
                    "path2": "/cave_1/module_0/sensor_5",
                    "pathModule": "/cave_1/module_0"
                },
                "17": {
                    "path1": "/cave_1/module_1/sensor_4",
                    "path2": "/cave_1/module_1/sensor_8",
                    "pathModule": "/cave_1/module_1"
                }
            }"#,
        )
        .unwrap();
        let table = OverlapTable::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.len(), 2);
        let d = table.get(17).unwrap();
        assert_eq!(d.local, 7);
        assert_eq!(d.sensor_a, GeoPath::new("/cave_1/module_1/sensor_4"));
        assert_eq!(d.sensor_b, GeoPath::new("/cave_1/module_1/sensor_8"));
        assert_eq!(d.module, GeoPath::new("/cave_1/module_1"));
    }

    #[test]
    fn test_load_overlap_table_rejects_non_numeric_id() {
        let path = temp_file("overlaps-bad-id.json");
        std::fs::write(
            &path,
            r#"{"first": {"path1": "/a", "path2": "/b", "pathModule": "/m"}}"#,
        )
        .unwrap();
        let err = OverlapTable::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, ConfigError::BadOverlapId { key, .. } if key == "first"));
    }

    #[test]
    fn test_load_overlap_table_rejects_local_index_without_ladder_slot() {
        let path = temp_file("overlaps-bad-local.json");
        std::fs::write(
            &path,
            r#"{"29": {"path1": "/a", "path2": "/b", "pathModule": "/m"}}"#,
        )
        .unwrap();
        let err = OverlapTable::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            err,
            ConfigError::BadOverlapIndex { id: 29, local: 9 }
        ));
    }

    #[test]
    fn test_load_sector_paths() {
        let path = temp_file("sector-paths.json");
        std::fs::write(
            &path,
            r#"{"2": ["/cave_1/plane_0/module_2", "/cave_1/plane_1/module_2"]}"#,
        )
        .unwrap();
        let paths = load_sector_paths(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(paths.len(), 1);
        assert_eq!(
            paths[&2],
            vec![
                GeoPath::new("/cave_1/plane_0/module_2"),
                GeoPath::new("/cave_1/plane_1/module_2"),
            ]
        );
    }

    #[test]
    fn test_load_sector_paths_rejects_bad_sector_key() {
        let path = temp_file("sector-paths-bad-key.json");
        std::fs::write(&path, r#"{"left": ["/cave_1/module_0"]}"#).unwrap();
        let err = load_sector_paths(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, ConfigError::BadSectorKey { key, .. } if key == "left"));
    }

    #[test]
    fn test_load_sector_matrices() {
        let path = temp_file("sector-matrices.json");
        let mut flat = vec![0.0; 16];
        for i in 0..4 {
            flat[i * 4 + i] = 1.0;
        }
        flat[3] = 2.5; // x translation, row-major
        let text = format!("{{\"1\": {}}}", serde_json::to_string(&flat).unwrap());
        std::fs::write(&path, text).unwrap();
        let matrices = load_sector_matrices(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(matrices.len(), 1);
        assert_eq!(matrices[&1][(0, 3)], 2.5);
        assert_eq!(matrices[&1][(2, 2)], 1.0);
    }

    #[test]
    fn test_load_sector_matrices_rejects_short_matrix() {
        let path = temp_file("sector-matrices-short.json");
        std::fs::write(&path, r#"{"4": [1.0, 0.0, 0.0]}"#).unwrap();
        let err = load_sector_matrices(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            err,
            ConfigError::BadSectorMatrix { sector: 4, len: 3 }
        ));
    }

    #[test]
    fn test_load_anchor_points() {
        let mut path = std::env::temp_dir();
        path.push(format!("detector-geom-anchors-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"0": [0.0, 0.0, 0.0, 1.0], "3": [1.5, -2.0, 10.0]}"#).unwrap();
        let anchors = load_anchor_points(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[&3], Point3::new(1.5, -2.0, 10.0));
    }

    #[test]
    fn test_load_anchor_points_rejects_bad_length() {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "detector-geom-anchors-bad-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{"1": [0.0, 1.0]}"#).unwrap();
        let err = load_anchor_points(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            err,
            ConfigError::BadAnchorPoint { sector: 1, len: 2 }
        ));
    }
}
