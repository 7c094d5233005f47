//! Detector geometry primitives shared by the alignment solvers.
//!
//! Provides hierarchical geometry paths, homogeneous 4x4 transform
//! utilities, JSON matrix-map I/O and the static run-configuration tables
//! (overlap topology, anchor points, sector module lists).

pub mod config;
pub mod matmap;
pub mod matrix;
pub mod path;

pub use config::{ConfigError, OverlapDescriptor, OverlapTable, OVERLAP_SENSOR_PAIRS};
pub use matmap::{load_matrices, save_matrices, MatrixIoError, MatrixMap};
pub use matrix::{base_transform, embed_xy, euler_angles, invert, is_rigid};
pub use path::GeoPath;
