//! Track-based module alignment.
//!
//! Estimates one corrective rigid transform per module plane from
//! reconstructed tracks crossing a sector, by iteratively pulling each
//! plane's hits toward anchored straight-line track fits. Sectors are
//! independent and aligned in parallel.

pub mod aligner;
pub mod track;

pub use aligner::{
    ModuleAlignError, ModuleAligner, ModuleAlignerConfig, ModuleAlignment, SectorAlignment, PLANES,
};
pub use track::{sanitize_tracks, TrackBundle};
