//! Combination of overlap matrices into per-sensor misalignments.
//!
//! Only sensors 0 and 1 are measured externally. Every other sensor is
//! reached from an anchor by walking a chain of overlap regions across the
//! two sensor rows; composing the overlap matrices along the chain (hops
//! taken against the fit direction are inverted) yields the net transform
//! `target*⁻¹ · anchor*` between the two misalignments in the global
//! frame. The chains below are fixed by the ladder layout in
//! [`detector_geom::OVERLAP_SENSOR_PAIRS`].

use std::collections::BTreeMap;

use nalgebra::Matrix4;

use detector_geom::{base_transform, invert, GeoPath, MatrixMap};

use crate::SensorAlignError;

/// Sensors whose misalignment is measured externally.
pub const ANCHOR_SENSORS: [u8; 2] = [0, 1];

/// One step across an overlap region. `reversed` walks from `sensor_b`
/// back to `sensor_a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub local: u8,
    pub reversed: bool,
}

/// A walk from an anchor sensor to a target sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    pub anchor: u8,
    pub hops: &'static [Hop],
}

const fn fwd(local: u8) -> Hop {
    Hop {
        local,
        reversed: false,
    }
}

const fn rev(local: u8) -> Hop {
    Hop {
        local,
        reversed: true,
    }
}

/// Chains reaching each non-anchor sensor. Sensor 5 overlaps both
/// anchors and gets one chain from each; the two solutions are averaged.
pub static SENSOR_CHAINS: &[(u8, &[Chain])] = &[
    (2, &[Chain { anchor: 1, hops: &[fwd(2), rev(3)] }]),
    (3, &[Chain { anchor: 1, hops: &[fwd(2), rev(3), fwd(4), rev(5)] }]),
    (
        4,
        &[Chain { anchor: 1, hops: &[fwd(2), rev(3), fwd(4), rev(5), fwd(6), rev(7)] }],
    ),
    (
        5,
        &[
            Chain { anchor: 0, hops: &[fwd(0)] },
            Chain { anchor: 1, hops: &[fwd(1)] },
        ],
    ),
    (6, &[Chain { anchor: 1, hops: &[fwd(2)] }]),
    (7, &[Chain { anchor: 1, hops: &[fwd(2), rev(3), fwd(4)] }]),
    (8, &[Chain { anchor: 1, hops: &[fwd(2), rev(3), fwd(4), rev(5), fwd(6)] }]),
    (
        9,
        &[Chain { anchor: 1, hops: &[fwd(2), rev(3), fwd(4), rev(5), fwd(6), rev(7), fwd(8)] }],
    ),
];

/// Chains reaching `target`, if it is not an anchor.
pub fn chains_for(target: u8) -> Option<&'static [Chain]> {
    SENSOR_CHAINS
        .iter()
        .find(|(sensor, _)| *sensor == target)
        .map(|(_, chains)| *chains)
}

/// Net overlap transform along `chain`: the product of its overlap
/// matrices, reversed hops inverted, later hops composed on the left.
/// Equals `target*⁻¹ · anchor*` in the global frame.
pub fn chain_product(
    module: &GeoPath,
    chain: &Chain,
    overlaps: &BTreeMap<u8, Matrix4<f64>>,
) -> Result<Matrix4<f64>, SensorAlignError> {
    let mut net = Matrix4::identity();
    for hop in chain.hops {
        let m = overlaps
            .get(&hop.local)
            .ok_or_else(|| SensorAlignError::MissingOverlap {
                module: module.clone(),
                local: hop.local,
            })?;
        let step = if hop.reversed { invert(m) } else { *m };
        net = step * net;
    }
    Ok(net)
}

/// Solve one chain: the target's misalignment in the global frame.
pub fn solve_chain(
    module: &GeoPath,
    chain: &Chain,
    overlaps: &BTreeMap<u8, Matrix4<f64>>,
    anchors_global: &BTreeMap<u8, Matrix4<f64>>,
) -> Result<Matrix4<f64>, SensorAlignError> {
    let net = chain_product(module, chain, overlaps)?;
    let anchor_global = anchors_global
        .get(&chain.anchor)
        .ok_or_else(|| SensorAlignError::MissingAnchor(module.sensor(chain.anchor)))?;
    Ok(anchor_global * invert(&net))
}

/// Combine the fitted overlap matrices of one module into sensor-local
/// misalignment matrices for all ten sensors.
///
/// `external` carries the sensor-local anchor measurements for sensors 0
/// and 1; they are copied into the result unchanged. Missing overlaps,
/// anchors or ideal matrices fail the whole module.
pub fn combine_module(
    module: &GeoPath,
    overlaps: &BTreeMap<u8, Matrix4<f64>>,
    ideal: &MatrixMap,
    external: &MatrixMap,
) -> Result<MatrixMap, SensorAlignError> {
    let ideal_sensor = |index: u8| -> Result<&Matrix4<f64>, SensorAlignError> {
        let path = module.sensor(index);
        ideal
            .get(&path)
            .ok_or(SensorAlignError::MissingIdeal(path))
    };

    let mut out = MatrixMap::new();
    let mut anchors_global = BTreeMap::new();
    for anchor in ANCHOR_SENSORS {
        let path = module.sensor(anchor);
        let local = external
            .get(&path)
            .ok_or_else(|| SensorAlignError::MissingAnchor(path.clone()))?;
        anchors_global.insert(anchor, base_transform(local, ideal_sensor(anchor)?));
        out.insert(path, *local);
    }

    for (target, chains) in SENSOR_CHAINS {
        let mut sum = Matrix4::zeros();
        for chain in chains.iter() {
            sum += solve_chain(module, chain, overlaps, &anchors_global)?;
        }
        let star_global = sum * (1.0 / chains.len() as f64);
        let star_local = base_transform(&star_global, &invert(ideal_sensor(*target)?));
        out.insert(module.sensor(*target), star_local);
    }

    Ok(out)
}
