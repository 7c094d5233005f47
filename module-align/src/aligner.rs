//! The per-sector corridor aligner.
//!
//! Tracks through a sector leave one hit per plane. After an anchored
//! straight-line fit through each track's hits, every plane's hits are
//! pulled toward their perpendicular foot points on the track lines by a
//! rigid 2D correction; repeating fit and correction converges on the
//! per-plane misalignment. The working frame is the detector-local frame,
//! where all planes are normal to z and the per-plane correction is a
//! plane transform.

use std::collections::BTreeMap;

use nalgebra::{Matrix4, Point3, Vector2};
use thiserror::Error;
use tracing::{debug, info, warn};

use align_math::{
    fit_line_svd, fit_rigid_2d, fit_rigid_3d, quantile_cut_centered, quantile_cut_radial,
    EstimatorError,
};
use detector_geom::{base_transform, invert, GeoPath, MatrixMap};

use crate::track::{sanitize_tracks, TrackBundle};

/// Number of planes in one sector corridor.
pub const PLANES: usize = 4;

#[derive(Debug, Error)]
pub enum ModuleAlignError {
    #[error("sector {sector} has no configured module paths")]
    UnknownSector { sector: u8 },
    #[error("sector {sector} configuration lists {got} module paths, expected {PLANES}")]
    BadSectorConfig { sector: u8, got: usize },
    #[error("missing ideal detector matrix for {0}")]
    MissingIdeal(GeoPath),
    #[error("missing anchor point for sector {sector}")]
    MissingAnchorPoint { sector: u8 },
    #[error("missing average misalignment matrix for sector {sector}")]
    MissingAverageMisalignment { sector: u8 },
    #[error("sector {sector}: {got} usable tracks, need at least {needed}")]
    InsufficientTracks {
        sector: u8,
        got: usize,
        needed: usize,
    },
    #[error("fit failed in sector {sector}: {source}")]
    Fit {
        sector: u8,
        #[source]
        source: EstimatorError,
    },
}

/// Tuning knobs of the corridor aligner. The defaults are the production
/// settings.
#[derive(Debug, Clone, Copy)]
pub struct ModuleAlignerConfig {
    /// Correction iterations after the anchored initial fit.
    pub iterations: usize,
    /// Percent of tracks cut by direction per direction cut.
    pub direction_cut_percent: f64,
    /// Percent of tracks cut per plane by reco-track distance, each
    /// iteration.
    pub distance_cut_percent: f64,
    /// Work in the detector-local frame (recos arrive in global
    /// coordinates, the anchor point in detector-local ones).
    pub pre_transform: bool,
    /// Below this many surviving tracks the result is flagged low
    /// confidence.
    pub low_confidence_tracks: usize,
    /// Below this many usable tracks the sector is not fit at all.
    pub min_fit_tracks: usize,
    /// Cap on the number of tracks entering the fit; `None` uses all.
    pub max_tracks: Option<usize>,
}

impl Default for ModuleAlignerConfig {
    fn default() -> Self {
        ModuleAlignerConfig {
            iterations: 5,
            direction_cut_percent: 1.0,
            distance_cut_percent: 1.0,
            pre_transform: true,
            low_confidence_tracks: 100,
            min_fit_tracks: 10,
            max_tracks: Some(40_000),
        }
    }
}

/// Result for one sector.
#[derive(Debug)]
pub struct SectorAlignment {
    pub sector: u8,
    /// One corrective matrix per module of the sector, module-local.
    pub matrices: MatrixMap,
    pub tracks_used: usize,
    pub tracks_dropped: usize,
    pub low_confidence: bool,
}

/// Merged result of a full run.
#[derive(Debug)]
pub struct ModuleAlignment {
    pub matrices: MatrixMap,
    pub sectors: Vec<SectorAlignment>,
    pub failures: Vec<(u8, ModuleAlignError)>,
}

/// State carried from one correction iteration to the next: the running
/// per-plane totals and the surviving, already-corrected tracks.
struct IterationState {
    totals: [Matrix4<f64>; PLANES],
    tracks: Vec<TrackBundle>,
}

/// Per-sector module alignment driver. Geometry tables are shared
/// read-only across sector workers.
pub struct ModuleAligner<'a> {
    ideal: &'a MatrixMap,
    sector_paths: &'a BTreeMap<u8, Vec<GeoPath>>,
    anchor_points: &'a BTreeMap<u8, Point3<f64>>,
    average_misalignments: &'a BTreeMap<u8, Matrix4<f64>>,
    detector_root: GeoPath,
    pub config: ModuleAlignerConfig,
}

impl<'a> ModuleAligner<'a> {
    pub fn new(
        ideal: &'a MatrixMap,
        sector_paths: &'a BTreeMap<u8, Vec<GeoPath>>,
        anchor_points: &'a BTreeMap<u8, Point3<f64>>,
        average_misalignments: &'a BTreeMap<u8, Matrix4<f64>>,
        detector_root: GeoPath,
    ) -> Self {
        ModuleAligner {
            ideal,
            sector_paths,
            anchor_points,
            average_misalignments,
            detector_root,
            config: ModuleAlignerConfig::default(),
        }
    }

    /// Align every sector for which tracks were supplied, in parallel.
    pub fn align(&self, tracks_by_sector: BTreeMap<u8, Vec<TrackBundle>>) -> ModuleAlignment {
        use rayon::prelude::*;

        info!(sectors = tracks_by_sector.len(), "aligning modules from sector tracks");
        let jobs: Vec<(u8, Vec<TrackBundle>)> = tracks_by_sector.into_iter().collect();
        let solved: Vec<(u8, Result<SectorAlignment, ModuleAlignError>)> = jobs
            .into_par_iter()
            .map(|(sector, tracks)| (sector, self.align_sector(sector, tracks)))
            .collect();

        let mut matrices = MatrixMap::new();
        let mut sectors = Vec::new();
        let mut failures = Vec::new();
        for (sector, result) in solved {
            match result {
                Ok(alignment) => {
                    matrices.extend(alignment.matrices.clone());
                    sectors.push(alignment);
                }
                Err(error) => {
                    warn!(sector, %error, "sector failed, omitting from result");
                    failures.push((sector, error));
                }
            }
        }
        info!(
            modules = matrices.len(),
            failed_sectors = failures.len(),
            "module alignment finished"
        );
        ModuleAlignment {
            matrices,
            sectors,
            failures,
        }
    }

    /// Align one sector.
    pub fn align_sector(
        &self,
        sector: u8,
        tracks: Vec<TrackBundle>,
    ) -> Result<SectorAlignment, ModuleAlignError> {
        let config = self.config;
        let paths = self
            .sector_paths
            .get(&sector)
            .ok_or(ModuleAlignError::UnknownSector { sector })?;
        if paths.len() != PLANES {
            return Err(ModuleAlignError::BadSectorConfig {
                sector,
                got: paths.len(),
            });
        }
        let module_ideals: Vec<&Matrix4<f64>> = paths
            .iter()
            .map(|path| {
                self.ideal
                    .get(path)
                    .ok_or_else(|| ModuleAlignError::MissingIdeal(path.clone()))
            })
            .collect::<Result<_, _>>()?;
        let root_ideal = self
            .ideal
            .get(&self.detector_root)
            .ok_or_else(|| ModuleAlignError::MissingIdeal(self.detector_root.clone()))?;
        let anchor = self
            .anchor_points
            .get(&sector)
            .ok_or(ModuleAlignError::MissingAnchorPoint { sector })?;
        let average = self
            .average_misalignments
            .get(&sector)
            .ok_or(ModuleAlignError::MissingAverageMisalignment { sector })?;

        let (mut tracks, tracks_dropped) = sanitize_tracks(tracks);
        if let Some(cap) = config.max_tracks {
            tracks.truncate(cap);
        }
        if tracks_dropped > 0 {
            warn!(sector, dropped = tracks_dropped, "dropped invalid track bundles");
        }
        if tracks.len() < config.min_fit_tracks {
            return Err(ModuleAlignError::InsufficientTracks {
                sector,
                got: tracks.len(),
                needed: config.min_fit_tracks,
            });
        }

        // Recos arrive in global coordinates, the anchor point in
        // detector-local ones; move the recos into the working frame.
        let anchor = if config.pre_transform {
            let to_local = invert(root_ideal);
            for track in &mut tracks {
                for reco in &mut track.recos {
                    *reco = to_local.transform_point(reco);
                }
            }
            *anchor
        } else {
            root_ideal.transform_point(anchor)
        };

        let wrap = |source: EstimatorError| ModuleAlignError::Fit { sector, source };

        refit_tracks(&mut tracks, Some(&anchor)).map_err(wrap)?;
        let mut state = IterationState {
            totals: [Matrix4::identity(); PLANES],
            tracks: direction_cut(tracks, config.direction_cut_percent),
        };

        for iteration in 0..config.iterations {
            state = iteration_step(state, iteration, &config).map_err(wrap)?;
            debug!(sector, iteration, tracks = state.tracks.len(), "iteration done");
        }

        let tracks_used = state.tracks.len();
        let mut matrices = MatrixMap::new();
        for (plane, path) in paths.iter().enumerate() {
            let mut total = state.totals[plane];
            if config.pre_transform {
                total = base_transform(&total, root_ideal);
            }
            total = base_transform(&total, &invert(module_ideals[plane]));
            total *= average;
            matrices.insert(path.clone(), total);
        }

        let low_confidence = tracks_used < config.low_confidence_tracks;
        if low_confidence {
            warn!(sector, tracks_used, "few surviving tracks, result is low confidence");
        }
        Ok(SectorAlignment {
            sector,
            matrices,
            tracks_used,
            tracks_dropped,
            low_confidence,
        })
    }
}

/// One correction iteration: distance cut, per-plane rigid correction
/// toward the track-line foot points, direction cut during the early
/// iterations, then a line refit without the anchor.
fn iteration_step(
    state: IterationState,
    iteration: usize,
    config: &ModuleAlignerConfig,
) -> Result<IterationState, EstimatorError> {
    let IterationState { mut totals, tracks } = state;
    let mut tracks = distance_cut(tracks, config.distance_cut_percent);

    for plane in 0..PLANES {
        let correction = plane_correction(&tracks, plane, config.pre_transform)?;
        totals[plane] = correction * totals[plane];
        for track in &mut tracks {
            track.recos[plane] = correction.transform_point(&track.recos[plane]);
        }
    }

    // The direction distribution is only trustworthy for cutting while
    // the planes still move a lot; later iterations keep all survivors.
    if iteration < 3 {
        tracks = direction_cut(tracks, config.direction_cut_percent);
    }
    refit_tracks(&mut tracks, None)?;

    Ok(IterationState { totals, tracks })
}

/// Rigid correction pulling one plane's recos onto their foot points.
///
/// In the detector-local frame the planes are normal to z and the
/// correction is a plane transform; without the pre-transform the recos
/// stay in the tilted global frame and the fit must run in full 3D.
fn plane_correction(
    tracks: &[TrackBundle],
    plane: usize,
    in_plane: bool,
) -> Result<Matrix4<f64>, EstimatorError> {
    if in_plane {
        let mut source = Vec::with_capacity(tracks.len());
        let mut target = Vec::with_capacity(tracks.len());
        for track in tracks {
            let foot = foot_point(track, plane);
            source.push(Vector2::new(track.recos[plane].x, track.recos[plane].y));
            target.push(Vector2::new(foot.x, foot.y));
        }
        Ok(fit_rigid_2d(&source, &target)?.to_homogeneous())
    } else {
        let mut source = Vec::with_capacity(tracks.len());
        let mut target = Vec::with_capacity(tracks.len());
        for track in tracks {
            source.push(track.recos[plane].coords);
            target.push(foot_point(track, plane).coords);
        }
        Ok(fit_rigid_3d(&source, &target)?.to_homogeneous())
    }
}

/// Perpendicular projection of the plane's reco onto the track line.
fn foot_point(track: &TrackBundle, plane: usize) -> Point3<f64> {
    let direction = track.direction.normalize();
    let to_origin = track.origin - track.recos[plane];
    let along = to_origin.dot(&direction);
    track.recos[plane] + (to_origin - direction * along)
}

/// Refit every track line through its recos, optionally anchored.
fn refit_tracks(
    tracks: &mut [TrackBundle],
    anchor: Option<&Point3<f64>>,
) -> Result<(), EstimatorError> {
    let mut points = Vec::with_capacity(PLANES + 1);
    for track in tracks.iter_mut() {
        points.clear();
        if let Some(anchor) = anchor {
            points.push(*anchor);
        }
        points.extend_from_slice(&track.recos);
        let (origin, direction) = fit_line_svd(&points)?;
        track.origin = origin;
        track.direction = direction;
    }
    Ok(())
}

/// Cut tracks whose direction sits in the tail of the x/y slope
/// distribution.
fn direction_cut(tracks: Vec<TrackBundle>, cut_percent: f64) -> Vec<TrackBundle> {
    quantile_cut_centered(tracks, cut_percent, |track| {
        Vector2::new(track.direction.x, track.direction.y)
    })
}

/// Cut tracks by their perpendicular reco-track distance, one pass per
/// plane.
fn distance_cut(mut tracks: Vec<TrackBundle>, cut_percent: f64) -> Vec<TrackBundle> {
    for plane in 0..PLANES {
        tracks = quantile_cut_radial(tracks, cut_percent, |track| {
            let offset = foot_point(track, plane) - track.recos[plane];
            Vector2::new(offset.x, offset.y)
        });
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_foot_point_is_perpendicular() {
        let track = TrackBundle {
            origin: Point3::new(0.0, 0.0, 0.0),
            direction: Vector3::new(0.1, -0.05, 1.0),
            recos: [
                Point3::new(0.3, 0.1, 2.0),
                Point3::new(0.0, 0.0, 4.0),
                Point3::new(0.0, 0.0, 6.0),
                Point3::new(0.0, 0.0, 8.0),
            ],
        };
        let foot = foot_point(&track, 0);
        let direction = track.direction.normalize();
        // Foot lies on the line and the offset is normal to it.
        let on_line = foot - track.origin;
        assert_relative_eq!(on_line.cross(&direction).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((foot - track.recos[0]).dot(&direction), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_refit_recovers_straight_track() {
        let origin = Point3::new(0.5, -0.5, 0.0);
        let direction = Vector3::new(0.01, 0.02, 1.0).normalize();
        let mut tracks = vec![TrackBundle {
            origin: Point3::origin(),
            direction: Vector3::z(),
            recos: [
                origin + direction * 10.0,
                origin + direction * 20.0,
                origin + direction * 30.0,
                origin + direction * 40.0,
            ],
        }];
        refit_tracks(&mut tracks, None).unwrap();
        assert_relative_eq!(tracks[0].direction, direction, epsilon = 1e-12);
    }
}
