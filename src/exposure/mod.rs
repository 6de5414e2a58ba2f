//! Science exposures: input metadata and per-exposure reduction state

pub mod manifest;
pub mod state;

pub use manifest::{ExposureManifest, ExposureMetadata};
pub use state::{DetectorState, ExposureState, TiltConvergence};
