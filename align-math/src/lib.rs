//! Numerical building blocks of the alignment solvers.
//!
//! Closed-form rigid point-set registration in 2D and 3D, robust outlier
//! quantile cuts, an SVD straight-line fit, and small statistics helpers.
//! Everything here is pure: no I/O, no logging, no global state.

pub mod cuts;
pub mod estimator;
pub mod line;
pub mod stats;

pub use cuts::{quantile_cut_centered, quantile_cut_pairs, quantile_cut_radial};
pub use estimator::{fit_rigid_2d, fit_rigid_3d, EstimatorError, RigidTransform2, RigidTransform3};
pub use line::fit_line_svd;
pub use stats::median;
