//! Calibration types and their dependency graph

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of master calibration frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationType {
    /// Combined bias frame
    Bias,
    /// Bad pixel mask
    BadPixelMask,
    /// Master arc frame
    Arc,
    /// Master trace frame (slit edges)
    Trace,
    /// Converged spectral tilt model
    Tilt,
    /// Wavelength solution from arc line identification
    WavelengthSolution,
    /// Pixel-to-pixel flat field
    PixelFlat,
    /// Standard star sensitivity response
    StandardResponse,
}

impl CalibrationType {
    /// All calibration types in dependency order
    pub fn all() -> &'static [Self] {
        &[
            Self::Bias,
            Self::BadPixelMask,
            Self::Arc,
            Self::Trace,
            Self::PixelFlat,
            Self::Tilt,
            Self::WavelengthSolution,
            Self::StandardResponse,
        ]
    }

    /// Types that must have a master frame before this one is computed
    pub fn dependencies(&self) -> &'static [Self] {
        match self {
            Self::Bias => &[],
            Self::BadPixelMask => &[Self::Bias],
            Self::Arc => &[Self::Bias],
            Self::Trace => &[Self::Bias],
            Self::PixelFlat => &[Self::Bias, Self::Trace],
            Self::Tilt => &[Self::Arc, Self::Trace],
            Self::WavelengthSolution => &[Self::Tilt, Self::Arc],
            Self::StandardResponse => &[Self::Bias, Self::WavelengthSolution],
        }
    }

    /// Whether `self` depends on `other`, directly or transitively
    pub fn depends_on(&self, other: Self) -> bool {
        self.dependencies()
            .iter()
            .any(|dep| *dep == other || dep.depends_on(other))
    }

    /// Types that (transitively) depend on this one
    pub fn dependents(&self) -> Vec<Self> {
        Self::all()
            .iter()
            .copied()
            .filter(|kind| kind.depends_on(*self))
            .collect()
    }

    /// Short label used in master frame names
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bias => "bias",
            Self::BadPixelMask => "badpix",
            Self::Arc => "arc",
            Self::Trace => "trace",
            Self::Tilt => "tilts",
            Self::WavelengthSolution => "wave",
            Self::PixelFlat => "pixflat",
            Self::StandardResponse => "standard",
        }
    }
}

impl fmt::Display for CalibrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bias => "Bias",
            Self::BadPixelMask => "BadPixelMask",
            Self::Arc => "Arc",
            Self::Trace => "Trace",
            Self::Tilt => "Tilt",
            Self::WavelengthSolution => "WavelengthSolution",
            Self::PixelFlat => "PixelFlat",
            Self::StandardResponse => "StandardResponse",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for CalibrationType {
    type Err = String;

    /// Parse the snake_case name, e.g. `bad_pixel_mask`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bias" => Ok(Self::Bias),
            "bad_pixel_mask" => Ok(Self::BadPixelMask),
            "arc" => Ok(Self::Arc),
            "trace" => Ok(Self::Trace),
            "tilt" => Ok(Self::Tilt),
            "wavelength_solution" => Ok(Self::WavelengthSolution),
            "pixel_flat" => Ok(Self::PixelFlat),
            "standard_response" => Ok(Self::StandardResponse),
            other => Err(format!("unknown calibration type '{}'", other)),
        }
    }
}
