//! Configuration schema for slitred
//!
//! Configuration is stored at `~/.config/slitred/config.toml` and may be
//! overlaid by a project-local `.slitred.toml`.

use crate::calib::CalibrationType;
use crate::error::{SlitredError, SlitredResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Reduction policy
    pub reduce: ReduceConfig,

    /// Detector mosaic layout
    pub mosaic: MosaicConfig,

    /// Output settings
    pub output: OutputConfig,

    /// Cross-exposure propagation tags
    pub propagation: PropagationConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Write per-exposure QA logs next to the spectra
    pub qa_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            qa_log: true,
        }
    }
}

/// Reduction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    /// Let later exposures reuse master frames computed for earlier ones
    pub reuse_master: bool,

    /// Stop after the calibrations are prepared
    pub prep_only: bool,

    /// Bind a stale master frame when its recompute fails
    pub stale_fallback: bool,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            reuse_master: false,
            prep_only: false,
            stale_fallback: true,
        }
    }
}

/// Detector mosaic layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicConfig {
    /// Number of detectors, indexed from 1
    pub ndet: usize,

    /// Per-detector settings, detector 1 first
    pub detectors: Vec<DetectorConfig>,
}

impl MosaicConfig {
    /// Declared binning of a detector (indexed from 1)
    pub fn binning(&self, detector: usize) -> Option<&str> {
        detector
            .checked_sub(1)
            .and_then(|i| self.detectors.get(i))
            .and_then(|d| d.binning.as_deref())
    }
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            ndet: 1,
            detectors: vec![DetectorConfig {
                binning: Some("1x1".to_string()),
            }],
        }
    }
}

/// Settings of one detector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Binning as "spec x spat", e.g. "2x2"
    pub binning: Option<String>,
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for extracted spectra and QA logs
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("Science"),
        }
    }
}

/// Explicit tags for cross-exposure propagation
///
/// Maps a computed calibration type to the slot type marked in sibling
/// exposures, e.g. `bad_pixel_mask = "arc"`. Unlisted types propagate as
/// themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub tags: BTreeMap<String, String>,
}

impl PropagationConfig {
    /// Parse the tag table
    pub fn resolve(&self) -> SlitredResult<BTreeMap<CalibrationType, CalibrationType>> {
        self.tags
            .iter()
            .map(|(from, to)| {
                let from = from.parse().map_err(SlitredError::User)?;
                let to = to.parse().map_err(SlitredError::User)?;
                Ok((from, to))
            })
            .collect()
    }
}
