//! Reduction orchestration
//!
//! [`Pipeline`] walks exposures and detectors; [`Sequencer`] drives one
//! (exposure, detector) unit through the [`Stage`] sequence; the numerical
//! work is delegated to a [`Calibrator`].

pub mod calibrator;
pub mod diagnostics;
pub mod geometry;
pub mod pipeline;
pub mod report;
pub mod sequencer;
pub mod stage;
pub mod synthetic;
pub mod writer;

pub use calibrator::{Calibrator, SpectraSink, UnitContext};
pub use diagnostics::{DiagnosticEvent, Diagnostics, MemoryDiagnostics, QaLog, TracingDiagnostics};
pub use pipeline::{Pipeline, RunOptions};
pub use report::{ExposureOutcome, ExposureReport, MasterSummary, RunSummary, UnitReport};
pub use sequencer::{Sequencer, SequencerPolicy, TILT_ITERATIONS};
pub use stage::Stage;
pub use synthetic::SyntheticCalibrator;
pub use writer::JsonSpectraWriter;
