//! Master calibration frames
//!
//! Master frames are keyed by instrument configuration, detector and
//! calibration type, and shared between exposures of the same run.
//!
//! # Reuse decision
//!
//! | Cache record | Condition | Action |
//! |--------------|-----------|--------|
//! | absent | | compute |
//! | fresh | reuse enabled, or computed by this exposure | reuse |
//! | fresh | reuse disabled, other exposure | compute |
//! | stale | slot satisfied by propagation | reuse (degraded) |
//! | stale | not satisfied | compute |

pub mod cache;
pub mod key;
pub mod kind;
pub mod propagate;

pub use cache::{Freshness, MasterArtifact, MasterFrameCache, MasterFrameRecord, MasterKey, UpdateEvent};
pub use key::{derive_key, InstrumentConfig};
pub use kind::CalibrationType;
pub use propagate::Propagator;
