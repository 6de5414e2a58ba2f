//! slitred - long-slit spectrograph reduction
//!
//! Reduces science exposures across a detector mosaic, keeping a cache of
//! master calibration frames keyed by instrument configuration so that
//! exposures taken with the same setup can share them.

pub mod calib;
pub mod cli;
pub mod config;
pub mod error;
pub mod exposure;
pub mod frame;
pub mod reduce;
pub mod ui;

pub use error::{SlitredError, SlitredResult};
