//! Track bundles entering the corridor aligner.

use nalgebra::{Point3, Vector3};

/// One reconstructed track with its hit on each of the four planes of a
/// sector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackBundle {
    /// A point on the track line.
    pub origin: Point3<f64>,
    /// Track direction; not required to be normalized on input.
    pub direction: Vector3<f64>,
    /// Reconstructed hit per plane, ordered by increasing z.
    pub recos: [Point3<f64>; 4],
}

impl TrackBundle {
    /// A bundle is usable when every coordinate is finite and the
    /// direction has a nonzero length.
    pub fn is_valid(&self) -> bool {
        let finite = self.origin.iter().all(|v| v.is_finite())
            && self.direction.iter().all(|v| v.is_finite())
            && self.recos.iter().all(|r| r.iter().all(|v| v.is_finite()));
        finite && self.direction.norm_squared() > 0.0
    }
}

/// Drop unusable bundles, returning the survivors and the dropped count.
pub fn sanitize_tracks(tracks: Vec<TrackBundle>) -> (Vec<TrackBundle>, usize) {
    let before = tracks.len();
    let kept: Vec<TrackBundle> = tracks.into_iter().filter(TrackBundle::is_valid).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good() -> TrackBundle {
        TrackBundle {
            origin: Point3::origin(),
            direction: Vector3::z(),
            recos: [
                Point3::new(0.0, 0.0, 1.0),
                Point3::new(0.0, 0.0, 2.0),
                Point3::new(0.0, 0.0, 3.0),
                Point3::new(0.0, 0.0, 4.0),
            ],
        }
    }

    #[test]
    fn test_sanitize_drops_and_counts() {
        let mut nan_hit = good();
        nan_hit.recos[2].x = f64::NAN;
        let mut zero_direction = good();
        zero_direction.direction = Vector3::zeros();

        let (kept, dropped) = sanitize_tracks(vec![good(), nan_hit, zero_direction, good()]);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 2);
    }
}
