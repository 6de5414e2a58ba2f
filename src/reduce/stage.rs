//! Reduction stages of one (exposure, detector) unit

use crate::calib::CalibrationType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stages in strict dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    AmplifierSectionsResolved,
    BiasReady,
    BadPixelMaskReady,
    ArcReady,
    DispersionDirectionKnown,
    TraceReady,
    GeometryDerived,
    FlatReady,
    TiltConverged,
    ArcParamReady,
    WavelengthSolutionReady,
    StandardReady,
    ScienceLoaded,
    ScienceReduced,
    FluxCalibrated,
    Done,
}

impl Stage {
    /// All stages in order
    pub fn all() -> &'static [Self] {
        &[
            Self::AmplifierSectionsResolved,
            Self::BiasReady,
            Self::BadPixelMaskReady,
            Self::ArcReady,
            Self::DispersionDirectionKnown,
            Self::TraceReady,
            Self::GeometryDerived,
            Self::FlatReady,
            Self::TiltConverged,
            Self::ArcParamReady,
            Self::WavelengthSolutionReady,
            Self::StandardReady,
            Self::ScienceLoaded,
            Self::ScienceReduced,
            Self::FluxCalibrated,
            Self::Done,
        ]
    }

    /// Master frame produced by this stage, if any
    pub fn calibration_type(&self) -> Option<CalibrationType> {
        match self {
            Self::BiasReady => Some(CalibrationType::Bias),
            Self::BadPixelMaskReady => Some(CalibrationType::BadPixelMask),
            Self::ArcReady => Some(CalibrationType::Arc),
            Self::TraceReady => Some(CalibrationType::Trace),
            Self::FlatReady => Some(CalibrationType::PixelFlat),
            Self::TiltConverged => Some(CalibrationType::Tilt),
            Self::WavelengthSolutionReady => Some(CalibrationType::WavelengthSolution),
            Self::StandardReady => Some(CalibrationType::StandardResponse),
            _ => None,
        }
    }

    /// Stages skipped when only the calibrations are prepared
    pub fn is_science(&self) -> bool {
        matches!(
            self,
            Self::StandardReady
                | Self::ScienceLoaded
                | Self::ScienceReduced
                | Self::FluxCalibrated
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
