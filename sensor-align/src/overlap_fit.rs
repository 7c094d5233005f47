//! Rigid fit of a single overlap region from hit pairs.

use nalgebra::{Matrix4, Point3, Vector2};
use ndarray::{s, Array2};

use align_math::{fit_rigid_2d, quantile_cut_pairs, EstimatorError};
use detector_geom::{base_transform, embed_xy, invert};

/// Hard cap on the number of hit pairs entering one fit. Large runs
/// produce tens of millions of pairs per overlap; beyond this the extra
/// statistics are not worth the memory.
pub const MAX_PAIRS: usize = 600_000;

/// Fit the rigid transform mapping sensor-a hits onto sensor-b hits for
/// one overlap region, returned in the global frame.
///
/// Rows of `pairs` are `[x1, y1, z1, x2, y2, z2]` in global coordinates.
/// The pairs are capped at [`MAX_PAIRS`], outlier-cut, moved into the
/// module-local frame (where both point clouds are small and the fit is
/// well conditioned), fitted in the sensor plane, and the result is
/// rebased into the global frame with the module's ideal matrix.
pub fn fit_overlap_matrix(
    pairs: &Array2<f64>,
    module_ideal: &Matrix4<f64>,
    cut_percent: f64,
) -> Result<Matrix4<f64>, EstimatorError> {
    let capped = pairs.slice(s![..pairs.nrows().min(MAX_PAIRS), ..]);
    let kept = quantile_cut_pairs(capped, cut_percent);

    let to_module = invert(module_ideal);
    let mut source = Vec::with_capacity(kept.nrows());
    let mut target = Vec::with_capacity(kept.nrows());
    for row in kept.rows() {
        let a = to_module.transform_point(&Point3::new(row[0], row[1], row[2]));
        let b = to_module.transform_point(&Point3::new(row[3], row[4], row[5]));
        source.push(Vector2::new(a.x, a.y));
        target.push(Vector2::new(b.x, b.y));
    }

    let fit = fit_rigid_2d(&source, &target)?;
    let homogeneous = embed_xy(&fit.rotation, &fit.translation);
    Ok(base_transform(&homogeneous, module_ideal))
}
