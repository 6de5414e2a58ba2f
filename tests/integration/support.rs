//! Test doubles for the reduction seams

use async_trait::async_trait;
use serde_json::json;
use slitred::calib::CalibrationType;
use slitred::config::schema::{DetectorConfig, MosaicConfig};
use slitred::error::{SlitredError, SlitredResult};
use slitred::exposure::{DetectorState, ExposureMetadata, ExposureState};
use slitred::frame::{
    AmplifierSections, ArcParams, Dispersion, Frame2D, SlitGeometry, Spectrum1D,
    StandardResponse, TiltModel, TraceEdges, WaveSolution,
};
use slitred::reduce::{Calibrator, SpectraSink, SyntheticCalibrator, UnitContext};
use std::path::PathBuf;
use std::sync::Mutex;

/// One collaborator call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub exposure: usize,
    pub detector: usize,
    pub step: &'static str,
}

/// One tilt refinement call
#[derive(Debug, Clone, PartialEq)]
pub struct TiltCall {
    pub exposure: usize,
    pub detector: usize,
    pub with_guess: bool,
    pub qa: bool,
}

/// Synthetic calibrator that records every call and fails on request
pub struct RecordingCalibrator {
    inner: SyntheticCalibrator,
    failures: Vec<(usize, usize, &'static str)>,
    no_bpm: bool,
    calls: Mutex<Vec<Call>>,
    tilts: Mutex<Vec<TiltCall>>,
    /// (shape, sum) of the bad pixel mask seen at extraction
    bad_pixels: Mutex<Vec<Option<((usize, usize), f64)>>>,
}

impl RecordingCalibrator {
    pub fn new() -> Self {
        Self {
            inner: SyntheticCalibrator::default(),
            failures: Vec::new(),
            no_bpm: false,
            calls: Mutex::new(Vec::new()),
            tilts: Mutex::new(Vec::new()),
            bad_pixels: Mutex::new(Vec::new()),
        }
    }

    /// Fail `step` for one (exposure, detector)
    pub fn failing(mut self, exposure: usize, detector: usize, step: &'static str) -> Self {
        self.failures.push((exposure, detector, step));
        self
    }

    /// Produce no bad pixel mask
    pub fn without_bpm(mut self) -> Self {
        self.no_bpm = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Steps called for one unit, in order
    pub fn steps(&self, exposure: usize, detector: usize) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| c.exposure == exposure && c.detector == detector)
            .map(|c| c.step)
            .collect()
    }

    pub fn tilt_calls(&self, exposure: usize, detector: usize) -> Vec<TiltCall> {
        self.tilts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.exposure == exposure && c.detector == detector)
            .cloned()
            .collect()
    }

    pub fn bad_pixels_seen(&self) -> Vec<Option<((usize, usize), f64)>> {
        self.bad_pixels.lock().unwrap().clone()
    }

    fn record(&self, unit: &UnitContext<'_>, step: &'static str) -> SlitredResult<()> {
        let exposure = unit.exposure_index();
        self.calls.lock().unwrap().push(Call {
            exposure,
            detector: unit.detector,
            step,
        });
        if self.failures.contains(&(exposure, unit.detector, step)) {
            return Err(SlitredError::compute(step, exposure, unit.detector, "injected"));
        }
        Ok(())
    }
}

#[async_trait]
impl Calibrator for RecordingCalibrator {
    async fn amplifier_sections(&self, unit: &UnitContext<'_>) -> SlitredResult<AmplifierSections> {
        self.record(unit, "amplifiers")?;
        self.inner.amplifier_sections(unit).await
    }

    async fn compute_bias(&self, unit: &UnitContext<'_>) -> SlitredResult<Frame2D> {
        self.record(unit, "bias")?;
        self.inner.compute_bias(unit).await
    }

    async fn compute_bad_pixel_mask(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
    ) -> SlitredResult<Option<Frame2D>> {
        self.record(unit, "badpix")?;
        if self.no_bpm {
            return Ok(None);
        }
        self.inner.compute_bad_pixel_mask(unit, bias).await
    }

    async fn compute_arc(&self, unit: &UnitContext<'_>, bias: &Frame2D) -> SlitredResult<Frame2D> {
        self.record(unit, "arc")?;
        self.inner.compute_arc(unit, bias).await
    }

    async fn dispersion_direction(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
    ) -> SlitredResult<Dispersion> {
        self.record(unit, "dispersion")?;
        self.inner.dispersion_direction(unit, arc).await
    }

    async fn compute_trace(&self, unit: &UnitContext<'_>, bias: &Frame2D) -> SlitredResult<Frame2D> {
        self.record(unit, "trace")?;
        self.inner.compute_trace(unit, bias).await
    }

    async fn trace_slit_edges(
        &self,
        unit: &UnitContext<'_>,
        trace: &Frame2D,
    ) -> SlitredResult<TraceEdges> {
        self.record(unit, "edges")?;
        self.inner.trace_slit_edges(unit, trace).await
    }

    async fn compute_pixel_flat(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
        geometry: &SlitGeometry,
    ) -> SlitredResult<Frame2D> {
        self.record(unit, "pixflat")?;
        self.inner.compute_pixel_flat(unit, bias, geometry).await
    }

    async fn compute_tilt_model(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
        guess: Option<&Frame2D>,
        qa: bool,
    ) -> SlitredResult<TiltModel> {
        self.record(unit, "tilts")?;
        self.tilts.lock().unwrap().push(TiltCall {
            exposure: unit.exposure_index(),
            detector: unit.detector,
            with_guess: guess.is_some(),
            qa,
        });
        self.inner.compute_tilt_model(unit, arc, guess, qa).await
    }

    async fn arc_params(&self, unit: &UnitContext<'_>) -> SlitredResult<ArcParams> {
        self.record(unit, "arcparam")?;
        self.inner.arc_params(unit).await
    }

    async fn wavelength_solution(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
        tilts: &TiltModel,
        params: &ArcParams,
    ) -> SlitredResult<WaveSolution> {
        self.record(unit, "wave")?;
        self.inner.wavelength_solution(unit, arc, tilts, params).await
    }

    async fn standard_response(&self, unit: &UnitContext<'_>) -> SlitredResult<StandardResponse> {
        self.record(unit, "standard")?;
        self.inner.standard_response(unit).await
    }

    async fn load_science_frame(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
        dispersion: &Dispersion,
    ) -> SlitredResult<Frame2D> {
        self.record(unit, "science")?;
        self.inner.load_science_frame(unit, bias, dispersion).await
    }

    async fn reduce_science(
        &self,
        unit: &UnitContext<'_>,
        science: &Frame2D,
        calibrations: &DetectorState,
    ) -> SlitredResult<Vec<Spectrum1D>> {
        self.record(unit, "reduce")?;
        self.bad_pixels.lock().unwrap().push(
            calibrations
                .bad_pixels
                .as_ref()
                .map(|m| (m.shape(), m.data.iter().sum::<f64>())),
        );
        self.inner.reduce_science(unit, science, calibrations).await
    }

    async fn apply_flux(
        &self,
        unit: &UnitContext<'_>,
        spectra: &mut [Spectrum1D],
        response: &StandardResponse,
    ) -> SlitredResult<()> {
        self.record(unit, "flux")?;
        self.inner.apply_flux(unit, spectra, response).await
    }
}

/// What the sink saw for one exposure
#[derive(Debug, Clone, PartialEq)]
pub struct Persisted {
    pub exposure: usize,
    pub detectors: Vec<usize>,
    pub spectra: usize,
    pub released: bool,
}

/// Sink that keeps a record of persisted exposures
#[derive(Default)]
pub struct MemorySink {
    persisted: Mutex<Vec<Persisted>>,
}

impl MemorySink {
    pub fn persisted(&self) -> Vec<Persisted> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpectraSink for MemorySink {
    async fn persist(&self, exposure: &ExposureState) -> SlitredResult<Option<PathBuf>> {
        self.persisted.lock().unwrap().push(Persisted {
            exposure: exposure.index(),
            detectors: exposure.detectors().map(|d| d.detector).collect(),
            spectra: exposure.spectra().len(),
            released: exposure.is_released(),
        });
        Ok(Some(PathBuf::from(format!("mem/{}", exposure.metadata.filename))))
    }
}

/// Exposure with a complete instrument setup
pub fn exposure(filename: &str, cdangle: f64) -> ExposureMetadata {
    ExposureMetadata::new(filename, "HD 1234")
        .with("slitwid", json!("1.0 arcsec"))
        .with("dichroic", json!("d55"))
        .with("disperser", json!("600/4000"))
        .with("cdangle", json!(cdangle))
}

/// Mosaic of `ndet` unbinned detectors
pub fn mosaic(ndet: usize) -> MosaicConfig {
    MosaicConfig {
        ndet,
        detectors: vec![
            DetectorConfig {
                binning: Some("1x1".to_string()),
            };
            ndet
        ],
    }
}

/// Every master frame type
pub fn all_types() -> Vec<CalibrationType> {
    CalibrationType::all().to_vec()
}
