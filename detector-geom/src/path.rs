//! Hierarchical geometry paths.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Path of a volume in the detector geometry tree, e.g.
/// `/cave_1/det_root_0/half_0/plane_0/module_0/sensor_3`.
///
/// Paths are plain strings to the solvers; only their identity and ordering
/// matter. Sensor paths hang directly below their module path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoPath(String);

impl GeoPath {
    pub fn new(path: impl Into<String>) -> Self {
        GeoPath(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of sensor `index` below this module path.
    pub fn sensor(&self, index: u8) -> GeoPath {
        GeoPath(format!("{}/sensor_{}", self.0, index))
    }

    /// Path of the enclosing volume, if any.
    pub fn parent(&self) -> Option<GeoPath> {
        let idx = self.0.rfind('/')?;
        if idx == 0 {
            return None;
        }
        Some(GeoPath(self.0[..idx].to_string()))
    }
}

impl fmt::Display for GeoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GeoPath {
    fn from(value: &str) -> Self {
        GeoPath(value.to_string())
    }
}

impl From<String> for GeoPath {
    fn from(value: String) -> Self {
        GeoPath(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_path() {
        let module = GeoPath::new("/cave_1/det_root_0/half_0/plane_0/module_0");
        let sensor = module.sensor(3);
        assert_eq!(
            sensor.as_str(),
            "/cave_1/det_root_0/half_0/plane_0/module_0/sensor_3"
        );
    }

    #[test]
    fn test_parent() {
        let sensor = GeoPath::new("/cave_1/det_root_0/module_0/sensor_3");
        let module = sensor.parent().unwrap();
        assert_eq!(module.as_str(), "/cave_1/det_root_0/module_0");
        assert_eq!(GeoPath::new("/cave_1").parent(), None);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = GeoPath::new("/cave_1/module_0");
        let b = GeoPath::new("/cave_1/module_1");
        assert!(a < b);
    }
}
