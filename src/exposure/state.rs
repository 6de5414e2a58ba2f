//! Per-exposure reduction state
//!
//! Geometry, tilt convergence and science products are owned by the
//! exposure. Master frames are shared `Arc`s into the master frame cache.

use crate::calib::{CalibrationType, InstrumentConfig, MasterArtifact};
use crate::exposure::ExposureMetadata;
use crate::frame::{
    AmplifierSections, ArcParams, Dispersion, Frame2D, SlitGeometry, Spectrum1D, TraceEdges,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Progress of the iterative tilt fit on one detector
#[derive(Debug, Clone, Default)]
pub struct TiltConvergence {
    /// Iterations run for this exposure (0 when the tilt was reused)
    pub iterations: usize,
    /// Whether the converged model came from the cache
    pub reused: bool,
}

/// Everything an exposure holds for one detector
#[derive(Debug, Clone)]
pub struct DetectorState {
    pub detector: usize,
    pub config: InstrumentConfig,
    pub amplifiers: Option<AmplifierSections>,
    /// Master frames bound for this exposure
    pub masters: BTreeMap<CalibrationType, Arc<MasterArtifact>>,
    pub dispersion: Option<Dispersion>,
    /// Zero mask used when no master bad pixel mask exists
    pub bad_pixels: Option<Frame2D>,
    pub trace: Option<TraceEdges>,
    pub geometry: Option<SlitGeometry>,
    pub tilt: TiltConvergence,
    pub arc_params: Option<ArcParams>,
    pub science: Option<Frame2D>,
    pub spectra: Vec<Spectrum1D>,
}

impl DetectorState {
    pub fn new(detector: usize, config: InstrumentConfig) -> Self {
        Self {
            detector,
            config,
            amplifiers: None,
            masters: BTreeMap::new(),
            dispersion: None,
            bad_pixels: None,
            trace: None,
            geometry: None,
            tilt: TiltConvergence::default(),
            arc_params: None,
            science: None,
            spectra: Vec::new(),
        }
    }

    /// Bound master frame of the given type
    pub fn master(&self, kind: CalibrationType) -> Option<&Arc<MasterArtifact>> {
        self.masters.get(&kind)
    }

    pub fn bind(&mut self, kind: CalibrationType, artifact: Arc<MasterArtifact>) {
        self.masters.insert(kind, artifact);
    }
}

/// Mutable record of one science exposure
#[derive(Debug)]
pub struct ExposureState {
    pub metadata: ExposureMetadata,
    /// Instrument configuration per detector (only detectors whose key derived)
    configs: BTreeMap<usize, InstrumentConfig>,
    /// Detector slots; a failed unit leaves its slot empty
    detectors: BTreeMap<usize, DetectorState>,
    /// (detector, type) slots satisfied from the cache by propagation
    satisfied: BTreeSet<(usize, CalibrationType)>,
    processed: bool,
    released: bool,
}

impl ExposureState {
    pub fn new(metadata: ExposureMetadata, configs: BTreeMap<usize, InstrumentConfig>) -> Self {
        Self {
            metadata,
            configs,
            detectors: BTreeMap::new(),
            satisfied: BTreeSet::new(),
            processed: false,
            released: false,
        }
    }

    pub fn index(&self) -> usize {
        self.metadata.index
    }

    /// Instrument configuration on a detector, if it could be derived
    pub fn config(&self, detector: usize) -> Option<&InstrumentConfig> {
        self.configs.get(&detector)
    }

    /// Mark a slot so the sequencer may serve it from the cache
    pub fn mark_satisfied(&mut self, detector: usize, kind: CalibrationType) {
        self.satisfied.insert((detector, kind));
    }

    pub fn is_satisfied(&self, detector: usize, kind: CalibrationType) -> bool {
        self.satisfied.contains(&(detector, kind))
    }

    pub fn detector(&self, detector: usize) -> Option<&DetectorState> {
        self.detectors.get(&detector)
    }

    /// Store the state of a finished detector unit
    pub fn store_detector(&mut self, state: DetectorState) {
        self.detectors.insert(state.detector, state);
    }

    /// Empty the slot of a failed detector unit
    pub fn clear_detector(&mut self, detector: usize) {
        if self.detectors.remove(&detector).is_some() {
            debug!("Cleared detector {} of exposure {}", detector, self.index());
        }
    }

    /// Detectors that hold a completed unit
    pub fn detectors(&self) -> impl Iterator<Item = &DetectorState> {
        self.detectors.values()
    }

    /// All extracted spectra, ordered by detector
    pub fn spectra(&self) -> Vec<&Spectrum1D> {
        self.detectors
            .values()
            .flat_map(|d| d.spectra.iter())
            .collect()
    }

    pub fn mark_processed(&mut self) {
        self.processed = true;
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// Drop per-detector arrays once the exposure has been written out
    pub fn release(&mut self) {
        self.detectors.clear();
        self.satisfied.clear();
        self.released = true;
        debug!("Released exposure {}", self.index());
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
