//! Closed-form rigid point-set registration.
//!
//! Given ordered point correspondences, finds the rotation and translation
//! minimizing the summed squared residuals: centroid subtraction, SVD of
//! the cross-covariance, reflection correction, translation from the
//! rotated centroid difference. Correspondences are known up front, so no
//! iterative nearest-neighbor loop is needed.

use nalgebra::{Matrix2, Matrix3, Matrix4, Vector2, Vector3};
use thiserror::Error;

/// Relative singular-value threshold below which the cross-covariance is
/// treated as rank-deficient.
const RANK_EPSILON: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("point sets must have equal length (source={source_len}, target={target_len})")]
    LengthMismatch { source_len: usize, target_len: usize },
    #[error("need at least {needed} points for a {dim}D rigid fit, got {got}")]
    TooFewPoints { needed: usize, dim: usize, got: usize },
    #[error("non-finite coordinate in input point set")]
    NonFinite,
    #[error("degenerate point set: cross-covariance is rank-deficient")]
    DegeneratePoints,
    #[error("singular value decomposition failed to produce factors")]
    SvdFailed,
}

/// A proper rigid transform in the plane: `p ↦ R·p + t` with `det(R) = +1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform2 {
    pub rotation: Matrix2<f64>,
    pub translation: Vector2<f64>,
}

impl RigidTransform2 {
    pub fn apply(&self, p: &Vector2<f64>) -> Vector2<f64> {
        self.rotation * p + self.translation
    }

    /// Homogeneous 4x4 embedding acting on the x/y plane, identity in z.
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<2, 2>(0, 0).copy_from(&self.rotation);
        m[(0, 3)] = self.translation.x;
        m[(1, 3)] = self.translation.y;
        m
    }
}

/// A proper rigid transform in space: `p ↦ R·p + t` with `det(R) = +1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform3 {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform3 {
    pub fn apply(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

fn check_lengths(source_len: usize, target_len: usize, dim: usize) -> Result<(), EstimatorError> {
    if source_len != target_len {
        return Err(EstimatorError::LengthMismatch {
            source_len,
            target_len,
        });
    }
    if source_len < dim {
        return Err(EstimatorError::TooFewPoints {
            needed: dim,
            dim,
            got: source_len,
        });
    }
    Ok(())
}

/// Least-squares rigid transform mapping `source` onto `target` in the
/// plane.
///
/// Degenerate inputs (all points coincident, non-finite coordinates) are
/// reported as errors; the result is never silently replaced by the
/// identity.
pub fn fit_rigid_2d(
    source: &[Vector2<f64>],
    target: &[Vector2<f64>],
) -> Result<RigidTransform2, EstimatorError> {
    check_lengths(source.len(), target.len(), 2)?;
    let n = source.len() as f64;

    let mut src_centroid = Vector2::zeros();
    let mut tgt_centroid = Vector2::zeros();
    for (s, t) in source.iter().zip(target) {
        if !(s.x.is_finite() && s.y.is_finite() && t.x.is_finite() && t.y.is_finite()) {
            return Err(EstimatorError::NonFinite);
        }
        src_centroid += s;
        tgt_centroid += t;
    }
    src_centroid /= n;
    tgt_centroid /= n;

    let mut h = Matrix2::zeros();
    for (s, t) in source.iter().zip(target) {
        h += (s - src_centroid) * (t - tgt_centroid).transpose();
    }

    let svd = h.svd(true, true);
    let sv = svd.singular_values;
    if !sv[0].is_finite() {
        return Err(EstimatorError::SvdFailed);
    }
    // Rank 1 (collinear points) still pins the rotation in 2D; only a zero
    // covariance leaves it free.
    if sv[0] <= RANK_EPSILON {
        return Err(EstimatorError::DegeneratePoints);
    }
    let u = svd.u.ok_or(EstimatorError::SvdFailed)?;
    let mut v_t = svd.v_t.ok_or(EstimatorError::SvdFailed)?;

    let mut rotation = v_t.transpose() * u.transpose();
    if rotation.determinant() < 0.0 {
        v_t.row_mut(1).scale_mut(-1.0);
        rotation = v_t.transpose() * u.transpose();
    }

    Ok(RigidTransform2 {
        rotation,
        translation: tgt_centroid - rotation * src_centroid,
    })
}

/// Least-squares rigid transform mapping `source` onto `target` in space.
///
/// Collinear point sets leave the roll around the line undetermined and
/// are rejected as degenerate.
pub fn fit_rigid_3d(
    source: &[Vector3<f64>],
    target: &[Vector3<f64>],
) -> Result<RigidTransform3, EstimatorError> {
    check_lengths(source.len(), target.len(), 3)?;
    let n = source.len() as f64;

    let mut src_centroid = Vector3::zeros();
    let mut tgt_centroid = Vector3::zeros();
    for (s, t) in source.iter().zip(target) {
        if !(s.iter().all(|v| v.is_finite()) && t.iter().all(|v| v.is_finite())) {
            return Err(EstimatorError::NonFinite);
        }
        src_centroid += s;
        tgt_centroid += t;
    }
    src_centroid /= n;
    tgt_centroid /= n;

    let mut h = Matrix3::zeros();
    for (s, t) in source.iter().zip(target) {
        h += (s - src_centroid) * (t - tgt_centroid).transpose();
    }

    let svd = h.svd(true, true);
    let sv = svd.singular_values;
    if !sv[0].is_finite() {
        return Err(EstimatorError::SvdFailed);
    }
    if sv[1] <= RANK_EPSILON * sv[0].max(1.0) {
        return Err(EstimatorError::DegeneratePoints);
    }
    let u = svd.u.ok_or(EstimatorError::SvdFailed)?;
    let mut v_t = svd.v_t.ok_or(EstimatorError::SvdFailed)?;

    let mut rotation = v_t.transpose() * u.transpose();
    if rotation.determinant() < 0.0 {
        v_t.row_mut(2).scale_mut(-1.0);
        rotation = v_t.transpose() * u.transpose();
    }

    Ok(RigidTransform3 {
        rotation,
        translation: tgt_centroid - rotation * src_centroid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn rot2(angle: f64) -> Matrix2<f64> {
        let (s, c) = angle.sin_cos();
        Matrix2::new(c, -s, s, c)
    }

    fn residual_2d(t: &RigidTransform2, src: &[Vector2<f64>], tgt: &[Vector2<f64>]) -> f64 {
        src.iter()
            .zip(tgt)
            .map(|(s, g)| (t.apply(s) - g).norm_squared())
            .sum()
    }

    #[test]
    fn test_exact_recovery_2d() {
        let mut rng = StdRng::seed_from_u64(7);
        let rotation = rot2(0.3);
        let translation = Vector2::new(1.5, -0.75);
        let source: Vec<Vector2<f64>> = (0..50)
            .map(|_| Vector2::new(rng.random_range(-10.0..10.0), rng.random_range(-10.0..10.0)))
            .collect();
        let target: Vec<Vector2<f64>> = source
            .iter()
            .map(|p| rotation * p + translation)
            .collect();

        let fit = fit_rigid_2d(&source, &target).unwrap();
        assert_relative_eq!(fit.rotation, rotation, epsilon = 1e-10);
        assert_relative_eq!(fit.translation, translation, epsilon = 1e-9);
    }

    #[test]
    fn test_exact_recovery_3d() {
        let mut rng = StdRng::seed_from_u64(11);
        let rotation = nalgebra::Rotation3::from_euler_angles(0.1, -0.2, 0.4).into_inner();
        let translation = Vector3::new(-2.0, 0.5, 3.0);
        let source: Vec<Vector3<f64>> = (0..80)
            .map(|_| {
                Vector3::new(
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-5.0..5.0),
                )
            })
            .collect();
        let target: Vec<Vector3<f64>> = source
            .iter()
            .map(|p| rotation * p + translation)
            .collect();

        let fit = fit_rigid_3d(&source, &target).unwrap();
        assert_relative_eq!(fit.rotation, rotation, epsilon = 1e-10);
        assert_relative_eq!(fit.translation, translation, epsilon = 1e-9);
    }

    #[test]
    fn test_result_is_always_proper_rotation() {
        // Random noisy correspondences, including near-degenerate clouds;
        // the reflection correction must keep det(R) at +1 throughout.
        let mut rng = StdRng::seed_from_u64(23);
        let noise = Normal::new(0.0, 0.5).unwrap();
        for _ in 0..50 {
            let source: Vec<Vector2<f64>> = (0..4)
                .map(|_| Vector2::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)))
                .collect();
            let target: Vec<Vector2<f64>> = source
                .iter()
                .map(|p| p + Vector2::new(noise.sample(&mut rng), noise.sample(&mut rng)))
                .collect();
            let fit = fit_rigid_2d(&source, &target).unwrap();
            assert_relative_eq!(fit.rotation.determinant(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_noise_optimality_2d() {
        // With Gaussian noise on the target, the fitted transform must not
        // have a larger residual than the true generating transform.
        let mut rng = StdRng::seed_from_u64(42);
        let noise = Normal::new(0.0, 0.01).unwrap();
        let rotation = rot2(-0.15);
        let translation = Vector2::new(0.4, 0.9);
        let source: Vec<Vector2<f64>> = (0..500)
            .map(|_| Vector2::new(rng.random_range(-3.0..3.0), rng.random_range(-3.0..3.0)))
            .collect();
        let target: Vec<Vector2<f64>> = source
            .iter()
            .map(|p| {
                rotation * p
                    + translation
                    + Vector2::new(noise.sample(&mut rng), noise.sample(&mut rng))
            })
            .collect();

        let fit = fit_rigid_2d(&source, &target).unwrap();
        let truth = RigidTransform2 {
            rotation,
            translation,
        };
        assert!(residual_2d(&fit, &source, &target) <= residual_2d(&truth, &source, &target));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let a = vec![Vector2::zeros(); 3];
        let b = vec![Vector2::zeros(); 4];
        assert_eq!(
            fit_rigid_2d(&a, &b),
            Err(EstimatorError::LengthMismatch {
                source_len: 3,
                target_len: 4
            })
        );
    }

    #[test]
    fn test_too_few_points_rejected() {
        let a = vec![Vector3::zeros(); 2];
        assert!(matches!(
            fit_rigid_3d(&a, &a),
            Err(EstimatorError::TooFewPoints { got: 2, .. })
        ));
    }

    #[test]
    fn test_coincident_points_are_degenerate() {
        let a = vec![Vector2::new(1.0, 2.0); 10];
        assert_eq!(fit_rigid_2d(&a, &a), Err(EstimatorError::DegeneratePoints));
    }

    #[test]
    fn test_collinear_3d_is_degenerate() {
        let a: Vec<Vector3<f64>> = (0..10)
            .map(|i| Vector3::new(i as f64, 2.0 * i as f64, -0.5 * i as f64))
            .collect();
        assert_eq!(fit_rigid_3d(&a, &a), Err(EstimatorError::DegeneratePoints));
    }

    #[test]
    fn test_non_finite_rejected() {
        let a = vec![Vector2::new(0.0, 0.0), Vector2::new(1.0, f64::NAN)];
        let b = vec![Vector2::new(0.0, 0.0), Vector2::new(1.0, 1.0)];
        assert_eq!(fit_rigid_2d(&a, &b), Err(EstimatorError::NonFinite));
    }

    #[test]
    fn test_homogeneous_embedding_2d() {
        let t = RigidTransform2 {
            rotation: rot2(0.2),
            translation: Vector2::new(3.0, -1.0),
        };
        let m = t.to_homogeneous();
        let p = Vector2::new(0.7, -0.3);
        let q = t.apply(&p);
        let hp = m * nalgebra::Vector4::new(p.x, p.y, 5.0, 1.0);
        assert_relative_eq!(hp.x, q.x, epsilon = 1e-12);
        assert_relative_eq!(hp.y, q.y, epsilon = 1e-12);
        assert_relative_eq!(hp.z, 5.0, epsilon = 1e-12);
    }
}
