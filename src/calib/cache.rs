//! Master frame cache
//!
//! Process-wide registry of master frames keyed by
//! (instrument configuration, detector, calibration type). Records are
//! superseded, never deleted, during a run. Every `put` queues an
//! [`UpdateEvent`] for the propagator and marks records that depend on the
//! new frame as stale.

use crate::calib::key::InstrumentConfig;
use crate::calib::kind::CalibrationType;
use crate::error::{SlitredError, SlitredResult};
use crate::frame::{Frame2D, StandardResponse, TiltModel, WaveSolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Computed content of a master frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact", rename_all = "snake_case")]
pub enum MasterArtifact {
    Frame(Frame2D),
    Tilt(TiltModel),
    Wave(WaveSolution),
    Response(StandardResponse),
}

impl MasterArtifact {
    pub fn as_frame(&self) -> SlitredResult<&Frame2D> {
        match self {
            Self::Frame(frame) => Ok(frame),
            other => Err(SlitredError::Internal(format!(
                "expected a frame artifact, found {}",
                other.name()
            ))),
        }
    }

    pub fn as_tilt(&self) -> SlitredResult<&TiltModel> {
        match self {
            Self::Tilt(tilt) => Ok(tilt),
            other => Err(SlitredError::Internal(format!(
                "expected a tilt artifact, found {}",
                other.name()
            ))),
        }
    }

    pub fn as_wave(&self) -> SlitredResult<&WaveSolution> {
        match self {
            Self::Wave(wave) => Ok(wave),
            other => Err(SlitredError::Internal(format!(
                "expected a wavelength solution, found {}",
                other.name()
            ))),
        }
    }

    pub fn as_response(&self) -> SlitredResult<&StandardResponse> {
        match self {
            Self::Response(response) => Ok(response),
            other => Err(SlitredError::Internal(format!(
                "expected a standard response, found {}",
                other.name()
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Frame(_) => "frame",
            Self::Tilt(_) => "tilt",
            Self::Wave(_) => "wave",
            Self::Response(_) => "response",
        }
    }

    /// SHA256 of the serialized artifact, first 12 hex chars
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let result = hasher.finalize();
        hex::encode(&result[..6])
    }
}

/// Freshness of a master frame record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Computed and not superseded upstream
    Fresh,
    /// An upstream dependency changed or the record was invalidated
    Stale,
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// Key of a master frame record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MasterKey {
    pub config: InstrumentConfig,
    pub detector: usize,
    pub kind: CalibrationType,
}

impl MasterKey {
    pub fn new(config: &InstrumentConfig, detector: usize, kind: CalibrationType) -> Self {
        Self {
            config: config.clone(),
            detector,
            kind,
        }
    }

    /// Master frame name, e.g. `Masterbias_S12-D3-G0-T45-B11_01`
    pub fn name(&self) -> String {
        format!("Master{}_{}_{:02}", self.kind.label(), self.config, self.detector)
    }
}

impl fmt::Display for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} det {}", self.kind, self.config, self.detector)
    }
}

/// A computed master frame
#[derive(Debug, Clone)]
pub struct MasterFrameRecord {
    pub key: MasterKey,
    /// Shared artifact; exposure states hold clones of this `Arc`
    pub artifact: Arc<MasterArtifact>,
    pub freshness: Freshness,
    /// Exposure index that last (re)computed the frame
    pub owner: usize,
    pub computed_at: DateTime<Utc>,
}

impl MasterFrameRecord {
    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }
}

/// Emitted for every `put`; consumed by the propagator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub key: MasterKey,
    pub owner: usize,
}

/// Registry of master frames for one run
#[derive(Debug, Default)]
pub struct MasterFrameCache {
    records: HashMap<MasterKey, MasterFrameRecord>,
    updates: Vec<UpdateEvent>,
}

impl MasterFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record
    pub fn lookup(
        &self,
        config: &InstrumentConfig,
        detector: usize,
        kind: CalibrationType,
    ) -> Option<&MasterFrameRecord> {
        self.records.get(&MasterKey::new(config, detector, kind))
    }

    /// Store a freshly computed artifact, superseding any prior record.
    ///
    /// Records of types depending on `kind` at the same (config, detector)
    /// are marked stale.
    pub fn put(
        &mut self,
        config: &InstrumentConfig,
        detector: usize,
        kind: CalibrationType,
        artifact: MasterArtifact,
        owner: usize,
    ) -> MasterFrameRecord {
        let key = MasterKey::new(config, detector, kind);
        let record = MasterFrameRecord {
            key: key.clone(),
            artifact: Arc::new(artifact),
            freshness: Freshness::Fresh,
            owner,
            computed_at: Utc::now(),
        };
        debug!("Stored {} (exposure {})", key.name(), owner);
        self.records.insert(key.clone(), record.clone());

        for dependent in kind.dependents() {
            self.invalidate(config, detector, dependent);
        }

        self.updates.push(UpdateEvent { key, owner });
        record
    }

    /// Mark a record stale, keeping its artifact as a fallback
    pub fn invalidate(&mut self, config: &InstrumentConfig, detector: usize, kind: CalibrationType) {
        if let Some(record) = self
            .records
            .get_mut(&MasterKey::new(config, detector, kind))
        {
            if record.is_fresh() {
                debug!("Invalidated {}", record.key.name());
            }
            record.freshness = Freshness::Stale;
        }
    }

    /// Take all update events queued since the last drain
    pub fn drain_updates(&mut self) -> Vec<UpdateEvent> {
        std::mem::take(&mut self.updates)
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, sorted by key
    pub fn records(&self) -> Vec<&MasterFrameRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }
}
