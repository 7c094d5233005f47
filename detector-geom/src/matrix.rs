//! Homogeneous 4x4 transform utilities.
//!
//! All alignment state is carried as homogeneous `Matrix4<f64>` transforms.
//! Composition is plain matrix multiplication; these helpers cover the
//! operations the solvers need beyond that.

use nalgebra::{Matrix2, Matrix4, Vector2, Vector3};

/// Threshold below which the euler decomposition switches to its
/// gimbal-lock branch.
const EULER_SINGULARITY_EPSILON: f64 = 1e-6;

/// Invert a rigid transform.
///
/// Alignment matrices are rigid by construction, so a non-invertible input
/// is a programming error, not a data condition. This panics rather than
/// threading an impossible error path through every pure-math caller.
pub fn invert(m: &Matrix4<f64>) -> Matrix4<f64> {
    match m.try_inverse() {
        Some(inv) => inv,
        None => panic!(
            "cannot invert degenerate transform (determinant {:.6e})",
            m.determinant()
        ),
    }
}

/// Re-express `m` in another coordinate frame.
///
/// `m` acts in the frame reached by `from_a_to_b`; the result is the same
/// transform expressed in the parent frame: `from_a_to_b * m * from_a_to_b⁻¹`.
/// Pass `invert(t)` to go from parent to child instead; the operation is
/// symmetric in form but not in meaning.
pub fn base_transform(m: &Matrix4<f64>, from_a_to_b: &Matrix4<f64>) -> Matrix4<f64> {
    from_a_to_b * m * invert(from_a_to_b)
}

/// Extrinsic x/y/z euler angles of the rotation block, in radians.
///
/// Near the gimbal-lock singularity (`sqrt(R00² + R10²) < 1e-6`) the z
/// angle is fixed to zero and x is recovered from the second row.
pub fn euler_angles(m: &Matrix4<f64>) -> Vector3<f64> {
    let sy = (m[(0, 0)].powi(2) + m[(1, 0)].powi(2)).sqrt();

    if sy >= EULER_SINGULARITY_EPSILON {
        Vector3::new(
            m[(2, 1)].atan2(m[(2, 2)]),
            (-m[(2, 0)]).atan2(sy),
            m[(1, 0)].atan2(m[(0, 0)]),
        )
    } else {
        Vector3::new((-m[(1, 2)]).atan2(m[(1, 1)]), (-m[(2, 0)]).atan2(sy), 0.0)
    }
}

/// Embed a 2D rigid transform into a homogeneous 4x4 acting on the x/y
/// plane, identity in z.
pub fn embed_xy(rotation: &Matrix2<f64>, translation: &Vector2<f64>) -> Matrix4<f64> {
    let mut m = Matrix4::identity();
    m.fixed_view_mut::<2, 2>(0, 0).copy_from(rotation);
    m[(0, 3)] = translation.x;
    m[(1, 3)] = translation.y;
    m
}

/// Whether `m` is a proper rigid transform within `tol`: orthonormal
/// rotation block with determinant +1 and affine last row `[0,0,0,1]`.
pub fn is_rigid(m: &Matrix4<f64>, tol: f64) -> bool {
    let r = m.fixed_view::<3, 3>(0, 0).into_owned();
    let ortho = (r * r.transpose() - nalgebra::Matrix3::identity()).norm() <= tol;
    let proper = (r.determinant() - 1.0).abs() <= tol;
    let affine = m[(3, 0)].abs() <= tol
        && m[(3, 1)].abs() <= tol
        && m[(3, 2)].abs() <= tol
        && (m[(3, 3)] - 1.0).abs() <= tol;
    ortho && proper && affine
}
