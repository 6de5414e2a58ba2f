//! Instrument configuration keys
//!
//! Exposures whose keys are equal are calibration-compatible and may share
//! master frames. A key is the ordered concatenation of the digits found in
//! the slit width, dichroic, disperser and cross-disperser angle header
//! values, followed by the detector binning:
//!
//! ```text
//! S{slitwid}-D{dichroic}-G{disperser}-T{cdangle}-B{binning}
//! ```
//!
//! Only digit characters survive, so `"1.0 arcsec"` and `"10"` collide. That
//! truncation is accepted; everything else about derivation is pure.

use crate::config::schema::MosaicConfig;
use crate::error::{SlitredError, SlitredResult};
use crate::exposure::ExposureMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Header keywords contributing to the key, with their prefixes
const KEY_FIELDS: &[(char, &str)] = &[
    ('S', "slitwid"),
    ('D', "dichroic"),
    ('G', "disperser"),
    ('T', "cdangle"),
];

/// Value used when a header keyword is absent
const MISSING_FIELD: &str = "0";

/// Binning assumed when the detector does not declare one
const DEFAULT_BINNING: &str = "1x1";

/// Derived instrument configuration identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentConfig(String);

impl InstrumentConfig {
    /// Wrap an already-derived key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Derive the instrument configuration of an exposure on one detector.
///
/// Detectors are indexed from 1. Fails only when `detector` lies outside the
/// mosaic; missing header values and missing binning fall back to defaults.
pub fn derive_key(
    metadata: &ExposureMetadata,
    mosaic: &MosaicConfig,
    detector: usize,
) -> SlitredResult<InstrumentConfig> {
    if detector == 0 || detector > mosaic.ndet {
        return Err(SlitredError::DetectorOutOfRange {
            detector,
            ndet: mosaic.ndet,
        });
    }

    let mut key = String::new();
    for (prefix, field) in KEY_FIELDS {
        let comp = metadata
            .value_text(field)
            .unwrap_or_else(|| MISSING_FIELD.to_string());
        key.push_str(&format!("{}{}-", prefix, digits(&comp)));
    }

    let binning = match mosaic.binning(detector) {
        Some(binning) => binning,
        None => {
            warn!("Assuming {} binning for detector {}", DEFAULT_BINNING, detector);
            DEFAULT_BINNING
        }
    };
    key.push_str(&format!("B{}", digits(binning)));

    Ok(InstrumentConfig(key))
}
