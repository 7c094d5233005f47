//! Sensor overlap alignment.
//!
//! Estimates the misalignment of every sensor on every module from hit
//! pairs recorded in the sensor overlap regions. Per module: fit one
//! rigid transform per overlap region, then chain the overlap transforms
//! from the two externally measured anchor sensors to every other sensor.
//! Modules are independent and solved in parallel; a module that cannot
//! be solved is reported and omitted from the merged result.

pub mod combiner;
pub mod overlap_fit;

use std::collections::BTreeMap;

use nalgebra::Matrix4;
use ndarray::Array2;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use align_math::EstimatorError;
use detector_geom::{GeoPath, MatrixMap, OverlapTable};

pub use combiner::{chains_for, combine_module, solve_chain, Chain, Hop, ANCHOR_SENSORS};
pub use overlap_fit::{fit_overlap_matrix, MAX_PAIRS};

/// Default outlier cut applied to the hit pairs of each overlap fit.
pub const DEFAULT_PAIR_CUT_PERCENT: f64 = 2.0;

#[derive(Debug, Error)]
pub enum SensorAlignError {
    #[error("no overlap matrix for local overlap {local} on module {module}")]
    MissingOverlap { module: GeoPath, local: u8 },
    #[error("missing ideal detector matrix for {0}")]
    MissingIdeal(GeoPath),
    #[error("missing external anchor matrix for {0}")]
    MissingAnchor(GeoPath),
    #[error("rigid fit failed for local overlap {local} on module {module}: {source}")]
    OverlapFit {
        module: GeoPath,
        local: u8,
        #[source]
        source: EstimatorError,
    },
}

/// Result of one solver run: the merged sensor matrices of all modules
/// that solved, plus the error of every module that did not.
#[derive(Debug)]
pub struct SensorAlignment {
    pub matrices: MatrixMap,
    pub failures: Vec<(GeoPath, SensorAlignError)>,
}

/// Per-module sensor alignment driver.
///
/// Holds the immutable geometry tables shared by all worker threads; the
/// hit-pair data comes in per run, keyed by global overlap ID.
pub struct SensorAligner<'a> {
    ideal: &'a MatrixMap,
    topology: &'a OverlapTable,
    external: &'a MatrixMap,
    pub pair_cut_percent: f64,
}

impl<'a> SensorAligner<'a> {
    pub fn new(ideal: &'a MatrixMap, topology: &'a OverlapTable, external: &'a MatrixMap) -> Self {
        SensorAligner {
            ideal,
            topology,
            external,
            pair_cut_percent: DEFAULT_PAIR_CUT_PERCENT,
        }
    }

    /// Solve every module for which hit pairs were supplied.
    pub fn align(&self, pairs_by_overlap: &BTreeMap<u32, Array2<f64>>) -> SensorAlignment {
        let mut per_module: BTreeMap<GeoPath, BTreeMap<u8, &Array2<f64>>> = BTreeMap::new();
        for (id, pairs) in pairs_by_overlap {
            match self.topology.get(*id) {
                Some(descriptor) => {
                    per_module
                        .entry(descriptor.module.clone())
                        .or_default()
                        .insert(descriptor.local, pairs);
                }
                None => warn!(overlap_id = id, "hit pairs for unknown overlap id, skipping"),
            }
        }

        info!(
            modules = per_module.len(),
            overlaps = pairs_by_overlap.len(),
            "solving sensor overlap alignment"
        );

        let jobs: Vec<_> = per_module.into_iter().collect();
        let solved: Vec<(GeoPath, Result<MatrixMap, SensorAlignError>)> = jobs
            .par_iter()
            .map(|(module, by_local)| (module.clone(), self.align_module(module, by_local)))
            .collect();

        let mut matrices = MatrixMap::new();
        let mut failures = Vec::new();
        for (module, result) in solved {
            match result {
                Ok(map) => matrices.extend(map),
                Err(error) => {
                    warn!(module = %module, %error, "module failed, omitting from result");
                    failures.push((module, error));
                }
            }
        }
        info!(
            sensors = matrices.len(),
            failed_modules = failures.len(),
            "sensor overlap alignment finished"
        );
        SensorAlignment { matrices, failures }
    }

    fn align_module(
        &self,
        module: &GeoPath,
        pairs_by_local: &BTreeMap<u8, &Array2<f64>>,
    ) -> Result<MatrixMap, SensorAlignError> {
        let module_ideal = self
            .ideal
            .get(module)
            .ok_or_else(|| SensorAlignError::MissingIdeal(module.clone()))?;

        let mut overlaps = BTreeMap::new();
        for (&local, pairs) in pairs_by_local {
            let matrix = fit_overlap_matrix(pairs, module_ideal, self.pair_cut_percent).map_err(
                |source| SensorAlignError::OverlapFit {
                    module: module.clone(),
                    local,
                    source,
                },
            )?;
            debug!(module = %module, local, pairs = pairs.nrows(), "overlap fitted");
            overlaps.insert(local, matrix);
        }

        combine_module(module, &overlaps, self.ideal, self.external)
    }
}
