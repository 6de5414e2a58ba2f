//! Diagnostics sink for reduction QA
//!
//! The orchestrator and sequencer report QA events to an injected
//! [`Diagnostics`] implementation instead of a global logger.

use crate::calib::{CalibrationType, Freshness};
use crate::reduce::stage::Stage;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// A QA event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    StageReached {
        exposure: usize,
        detector: usize,
        stage: Stage,
    },
    MasterComputed {
        exposure: usize,
        detector: usize,
        kind: CalibrationType,
        name: String,
        digest: String,
    },
    MasterReused {
        exposure: usize,
        detector: usize,
        kind: CalibrationType,
        name: String,
        digest: String,
        owner: usize,
        freshness: Freshness,
    },
    /// A stale master frame was used because nothing fresher exists
    StaleMaster {
        exposure: usize,
        detector: usize,
        kind: CalibrationType,
        name: String,
        reason: String,
    },
    SlitTrace {
        exposure: usize,
        detector: usize,
        orders: usize,
        width: usize,
    },
    TiltIteration {
        exposure: usize,
        detector: usize,
        iteration: usize,
        of: usize,
    },
    /// Tilt QA, produced after the final iteration only
    TiltQa {
        exposure: usize,
        detector: usize,
        iterations: usize,
    },
    UnitFailed {
        exposure: usize,
        detector: usize,
        stage: Stage,
        error: String,
    },
}

impl DiagnosticEvent {
    pub fn exposure(&self) -> usize {
        match self {
            Self::StageReached { exposure, .. }
            | Self::MasterComputed { exposure, .. }
            | Self::MasterReused { exposure, .. }
            | Self::StaleMaster { exposure, .. }
            | Self::SlitTrace { exposure, .. }
            | Self::TiltIteration { exposure, .. }
            | Self::TiltQa { exposure, .. }
            | Self::UnitFailed { exposure, .. } => *exposure,
        }
    }
}

/// Receiver of QA events
#[async_trait]
pub trait Diagnostics: Send + Sync {
    async fn record(&self, event: DiagnosticEvent);

    /// Close the QA output of an exposure
    async fn close(&self, exposure: usize);
}

/// Forwards events to `tracing`
#[derive(Debug, Default)]
pub struct TracingDiagnostics;

#[async_trait]
impl Diagnostics for TracingDiagnostics {
    async fn record(&self, event: DiagnosticEvent) {
        match &event {
            DiagnosticEvent::StaleMaster { .. } | DiagnosticEvent::UnitFailed { .. } => {
                warn!("QA: {:?}", event)
            }
            _ => debug!("QA: {:?}", event),
        }
    }

    async fn close(&self, exposure: usize) {
        debug!("QA closed for exposure {}", exposure);
    }
}

/// Appends events as JSON lines to one file per exposure
pub struct QaLog {
    directory: PathBuf,
}

impl QaLog {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    /// QA file of an exposure
    pub fn path(&self, exposure: usize) -> PathBuf {
        self.directory.join(format!("qa_{:04}.jsonl", exposure))
    }

    /// Silently drops events on IO failure; QA must never stop a reduction.
    async fn write(&self, exposure: usize, entry: serde_json::Value) {
        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize QA event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(exposure, &line).await {
            warn!("Failed to write QA log: {}", e);
        }
    }

    async fn append(&self, exposure: usize, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(exposure))
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Diagnostics for QaLog {
    async fn record(&self, event: DiagnosticEvent) {
        let exposure = event.exposure();
        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "qa": event,
        });
        self.write(exposure, entry).await;
    }

    async fn close(&self, exposure: usize) {
        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "qa": { "event": "closed", "exposure": exposure },
        });
        self.write(exposure, entry).await;
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    events: Mutex<Vec<DiagnosticEvent>>,
    closed: Mutex<Vec<usize>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Exposures whose QA was closed, in order
    pub fn closed(&self) -> Vec<usize> {
        self.closed.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Diagnostics for MemoryDiagnostics {
    async fn record(&self, event: DiagnosticEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    async fn close(&self, exposure: usize) {
        if let Ok(mut closed) = self.closed.lock() {
            closed.push(exposure);
        }
    }
}
