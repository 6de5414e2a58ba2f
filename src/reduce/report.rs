//! Run, exposure and unit reports

use crate::calib::{CalibrationType, Freshness, InstrumentConfig, MasterFrameRecord};
use crate::reduce::stage::Stage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Outcome of one (exposure, detector) unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReport {
    pub exposure: usize,
    pub detector: usize,
    pub config: Option<InstrumentConfig>,
    /// Last stage completed
    pub reached: Option<Stage>,
    /// Master frames computed by this unit
    pub computed: Vec<CalibrationType>,
    /// Master frames taken from the cache
    pub reused: Vec<CalibrationType>,
    /// Master frames bound in degraded (stale) mode
    pub degraded: Vec<CalibrationType>,
    /// Tilt refinement iterations run by this unit
    pub tilt_iterations: usize,
    /// Stopped after the calibrations because of the preparation-only gate
    pub prep_only: bool,
    pub failed_at: Option<Stage>,
    pub error: Option<String>,
}

impl UnitReport {
    pub fn new(exposure: usize, detector: usize) -> Self {
        Self {
            exposure,
            detector,
            config: None,
            reached: None,
            computed: Vec::new(),
            reused: Vec::new(),
            degraded: Vec::new(),
            tilt_iterations: 0,
            prep_only: false,
            failed_at: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of an exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureOutcome {
    /// Every detector completed
    Completed,
    /// Some detectors failed
    Partial,
    /// No detector completed or the spectra could not be written
    Failed,
}

impl fmt::Display for ExposureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one science exposure
#[derive(Debug, Clone, Serialize)]
pub struct ExposureReport {
    pub index: usize,
    pub filename: String,
    pub target: String,
    pub outcome: ExposureOutcome,
    pub units: Vec<UnitReport>,
    /// Persisted spectra; absent when the exposure produced nothing
    pub output: Option<PathBuf>,
    /// Exposure-level error, e.g. persistence failure
    pub error: Option<String>,
}

impl ExposureReport {
    /// Derive the outcome from the unit reports
    pub fn outcome_of(units: &[UnitReport]) -> ExposureOutcome {
        let ok = units.iter().filter(|u| u.succeeded()).count();
        if ok == units.len() && ok > 0 {
            ExposureOutcome::Completed
        } else if ok > 0 {
            ExposureOutcome::Partial
        } else {
            ExposureOutcome::Failed
        }
    }
}

/// Summary of a master frame left in the cache
#[derive(Debug, Clone, Serialize)]
pub struct MasterSummary {
    pub name: String,
    pub kind: CalibrationType,
    pub detector: usize,
    pub config: InstrumentConfig,
    pub owner: usize,
    pub freshness: Freshness,
    pub digest: String,
}

impl From<&MasterFrameRecord> for MasterSummary {
    fn from(record: &MasterFrameRecord) -> Self {
        Self {
            name: record.key.name(),
            kind: record.key.kind,
            detector: record.key.detector,
            config: record.key.config.clone(),
            owner: record.owner,
            freshness: record.freshness,
            digest: record.artifact.digest(),
        }
    }
}

/// Result of a full run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 0 when every unit completed, 1 otherwise
    pub status: i32,
    pub reuse_master: bool,
    pub prep_only: bool,
    pub exposures: Vec<ExposureReport>,
    pub masters: Vec<MasterSummary>,
}

impl RunSummary {
    /// Every unit of every exposure
    pub fn units(&self) -> impl Iterator<Item = &UnitReport> {
        self.exposures.iter().flat_map(|e| e.units.iter())
    }

    pub fn failed_units(&self) -> usize {
        self.units().filter(|u| !u.succeeded()).count()
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}
