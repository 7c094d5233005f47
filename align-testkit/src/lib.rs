//! Synthetic detector fixtures for the alignment integration tests.
//!
//! Provides a one-module ideal geometry with the full sensor overlap
//! ladder, a 4-plane sector geometry, seeded random misalignments, and
//! ground-truth overlap matrices and hit pairs derived from them. All
//! randomness goes through caller-supplied seeded generators, so every
//! fixture is deterministic. Units are centimeters, matching the real
//! geometry files.

use std::collections::BTreeMap;

use nalgebra::{Matrix4, Point3, Rotation3, Vector3};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use detector_geom::{base_transform, invert, GeoPath, MatrixMap, OVERLAP_SENSOR_PAIRS};

/// Canonical module path used by the single-module fixtures.
pub fn module_path() -> GeoPath {
    GeoPath::new("/cave_1/det_root_0/half_0/plane_0/module_0")
}

fn translation(x: f64, y: f64, z: f64) -> Matrix4<f64> {
    Matrix4::new_translation(&Vector3::new(x, y, z))
}

/// Position of sensor `index` within its module: two staggered rows of
/// five, back row half a pitch off so each back sensor overlaps one or
/// two front sensors.
fn sensor_in_module(index: u8) -> Matrix4<f64> {
    const PITCH: f64 = 3.0;
    if index < 5 {
        translation(f64::from(index) * PITCH - 6.0, 0.0, -0.1)
    } else {
        translation(f64::from(index - 5) * PITCH - 4.5, 0.0, 0.1)
    }
}

/// Ideal global matrices for the fixture module and its ten sensors.
/// The module sits off-axis with a small tilt, so frame conversions are
/// exercised for real.
pub fn ideal_module_matrices() -> MatrixMap {
    let module = module_path();
    let module_global =
        translation(25.0, 3.0, 1100.0) * Rotation3::from_euler_angles(0.0, 0.02, 0.0).to_homogeneous();

    let mut map = MatrixMap::new();
    map.insert(module.clone(), module_global);
    for index in 0..10 {
        map.insert(module.sensor(index), module_global * sensor_in_module(index));
    }
    map
}

/// Small in-plane rigid misalignment in a sensor-local frame: x/y shift
/// and z rotation, both normally distributed.
pub fn small_inplane_misalignment(
    rng: &mut StdRng,
    shift_sigma: f64,
    rot_sigma: f64,
) -> Matrix4<f64> {
    let shift = Normal::new(0.0, shift_sigma).unwrap();
    let rot = Normal::new(0.0, rot_sigma).unwrap();
    translation(shift.sample(rng), shift.sample(rng), 0.0)
        * Rotation3::from_euler_angles(0.0, 0.0, rot.sample(rng)).to_homogeneous()
}

/// One random in-plane misalignment per sensor of the fixture module.
pub fn random_sensor_misalignments(
    rng: &mut StdRng,
    shift_sigma: f64,
    rot_sigma: f64,
) -> BTreeMap<u8, Matrix4<f64>> {
    (0..10)
        .map(|index| (index, small_inplane_misalignment(rng, shift_sigma, rot_sigma)))
        .collect()
}

/// Re-express a sensor-local misalignment in the global frame using the
/// sensor's ideal global matrix.
pub fn misalignment_to_global(local: &Matrix4<f64>, ideal_global: &Matrix4<f64>) -> Matrix4<f64> {
    base_transform(local, ideal_global)
}

/// Ground-truth overlap matrices for the fixture module, keyed by local
/// overlap index.
///
/// A hit measured by a misaligned sensor lands in the global frame at
/// `reco = M*⁻¹ · p` where `M*` is the sensor's misalignment in global.
/// The transform taking sensor-a recos onto sensor-b recos is therefore
/// `M(a→b) = Mb*⁻¹ · Ma*`; this is exactly what the overlap fit sees.
pub fn ground_truth_overlap_matrices(
    ideal: &MatrixMap,
    module: &GeoPath,
    local_misalignments: &BTreeMap<u8, Matrix4<f64>>,
) -> BTreeMap<u8, Matrix4<f64>> {
    let star = |sensor: u8| {
        misalignment_to_global(&local_misalignments[&sensor], &ideal[&module.sensor(sensor)])
    };
    OVERLAP_SENSOR_PAIRS
        .iter()
        .enumerate()
        .map(|(local, &(a, b))| (local as u8, invert(&star(b)) * star(a)))
        .collect()
}

/// Synthetic hit pairs for one overlap region, rows `[x1,y1,z1,x2,y2,z2]`.
///
/// True impact points are sampled on the overlap strip between the two
/// sensors in the module plane, then observed through each sensor's
/// misalignment.
pub fn synthetic_hit_pairs(
    rng: &mut StdRng,
    count: usize,
    ideal: &MatrixMap,
    module: &GeoPath,
    local_misalignments: &BTreeMap<u8, Matrix4<f64>>,
    local_overlap: u8,
) -> Array2<f64> {
    let (a, b) = OVERLAP_SENSOR_PAIRS[local_overlap as usize];
    let star_a = misalignment_to_global(&local_misalignments[&a], &ideal[&module.sensor(a)]);
    let star_b = misalignment_to_global(&local_misalignments[&b], &ideal[&module.sensor(b)]);
    let seen_by_a = invert(&star_a);
    let seen_by_b = invert(&star_b);

    let module_global = &ideal[module];
    // Overlap strip midpoint in the module frame.
    let center_x = (sensor_in_module(a)[(0, 3)] + sensor_in_module(b)[(0, 3)]) / 2.0;

    let mut rows = Vec::with_capacity(count * 6);
    for _ in 0..count {
        let in_module = Point3::new(
            center_x + rng.random_range(-0.4..0.4),
            rng.random_range(-1.5..1.5),
            0.0,
        );
        let truth = module_global.transform_point(&in_module);
        let hit_a = seen_by_a.transform_point(&truth);
        let hit_b = seen_by_b.transform_point(&truth);
        rows.extend_from_slice(&[hit_a.x, hit_a.y, hit_a.z, hit_b.x, hit_b.y, hit_b.z]);
    }
    Array2::from_shape_vec((count, 6), rows).expect("row count matches")
}

/// A 4-plane sector geometry: detector root at the origin, one module per
/// plane along z, plus the sector's track anchor point near the
/// interaction region.
pub struct SectorFixture {
    pub root: GeoPath,
    pub modules: Vec<GeoPath>,
    pub ideal: MatrixMap,
    pub anchor: Point3<f64>,
}

pub fn sector_fixture() -> SectorFixture {
    let root = GeoPath::new("/cave_1/det_root_0");
    let modules: Vec<GeoPath> = (0..4)
        .map(|plane| GeoPath::new(format!("/cave_1/det_root_0/half_0/plane_{plane}/module_0")))
        .collect();

    let mut ideal = MatrixMap::new();
    ideal.insert(root.clone(), Matrix4::identity());
    for (plane, module) in modules.iter().enumerate() {
        ideal.insert(module.clone(), translation(0.0, 0.0, 1100.0 + 20.0 * plane as f64));
    }

    SectorFixture {
        root,
        modules,
        ideal,
        anchor: Point3::origin(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_fixture_is_deterministic() {
        let a = random_sensor_misalignments(&mut StdRng::seed_from_u64(1), 1e-3, 1e-4);
        let b = random_sensor_misalignments(&mut StdRng::seed_from_u64(1), 1e-3, 1e-4);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ideal_geometry_shape() {
        let ideal = ideal_module_matrices();
        // Module plus ten sensors.
        assert_eq!(ideal.len(), 11);
        let module = module_path();
        assert!(ideal.contains_key(&module.sensor(9)));
    }

    #[test]
    fn test_hit_pairs_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let ideal = ideal_module_matrices();
        let module = module_path();
        let mis = random_sensor_misalignments(&mut rng, 1e-3, 1e-4);
        let pairs = synthetic_hit_pairs(&mut rng, 10, &ideal, &module, &mis, 4);
        assert_eq!(pairs.shape(), &[10, 6]);
    }
}
