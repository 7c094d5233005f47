//! Straight-line fit through a 3D point cloud.

use nalgebra::{DMatrix, Point3, Vector3};

use crate::estimator::EstimatorError;

/// Least-squares line through `points`: centroid plus the dominant
/// right-singular vector of the centered point matrix, as a unit vector
/// flipped to positive z.
///
/// Callers wanting an anchored fit stack the anchor point into `points`
/// themselves.
pub fn fit_line_svd(points: &[Point3<f64>]) -> Result<(Point3<f64>, Vector3<f64>), EstimatorError> {
    let n = points.len();
    if n < 2 {
        return Err(EstimatorError::TooFewPoints {
            needed: 2,
            dim: 3,
            got: n,
        });
    }
    for p in points {
        if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
            return Err(EstimatorError::NonFinite);
        }
    }

    let mut centroid = Vector3::zeros();
    for p in points {
        centroid += p.coords;
    }
    centroid /= n as f64;

    let centered = DMatrix::from_fn(n, 3, |i, j| points[i][j] - centroid[j]);
    let svd = centered.svd(false, true);
    if svd.singular_values[0] <= 0.0 || !svd.singular_values[0].is_finite() {
        return Err(EstimatorError::DegeneratePoints);
    }
    let v_t = svd.v_t.ok_or(EstimatorError::SvdFailed)?;

    let mut direction = Vector3::new(v_t[(0, 0)], v_t[(0, 1)], v_t[(0, 2)]);
    if direction.z < 0.0 {
        direction = -direction;
    }

    Ok((Point3::from(centroid), direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_exact_line_recovery() {
        let origin = Point3::new(1.0, -2.0, 0.0);
        let direction = Vector3::new(0.02, -0.01, 1.0).normalize();
        let points: Vec<Point3<f64>> =
            (0..6).map(|i| origin + direction * (i as f64 * 10.0)).collect();

        let (fit_origin, fit_direction) = fit_line_svd(&points).unwrap();
        assert_relative_eq!(fit_direction, direction, epsilon = 1e-12);
        // The fitted origin is the centroid; it must lie on the line.
        let offset = fit_origin - origin;
        let off_line = offset - direction * offset.dot(&direction);
        assert_relative_eq!(off_line.norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_direction_points_to_positive_z() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let direction: Vector3<f64> = Vector3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            if direction.norm() < 1e-3 || direction.z.abs() < 1e-3 {
                continue;
            }
            let points: Vec<Point3<f64>> =
                (0..5).map(|i| Point3::origin() + direction * i as f64).collect();
            let (_, fit_direction) = fit_line_svd(&points).unwrap();
            assert!(fit_direction.z > 0.0);
        }
    }

    #[test]
    fn test_coincident_points_rejected() {
        let points = vec![Point3::new(1.0, 1.0, 1.0); 4];
        assert_eq!(
            fit_line_svd(&points),
            Err(EstimatorError::DegeneratePoints)
        );
    }

    #[test]
    fn test_single_point_rejected() {
        let points = vec![Point3::origin()];
        assert!(matches!(
            fit_line_svd(&points),
            Err(EstimatorError::TooFewPoints { got: 1, .. })
        ));
    }
}
