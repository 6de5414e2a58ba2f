//! Collaborator seams of the reduction
//!
//! The numerical algorithms that produce master frames and spectra live
//! behind [`Calibrator`]; persistence lives behind [`SpectraSink`]. The
//! orchestrator only decides when each one runs.

use crate::calib::InstrumentConfig;
use crate::error::SlitredResult;
use crate::exposure::{DetectorState, ExposureMetadata, ExposureState};
use crate::frame::{
    AmplifierSections, ArcParams, Dispersion, Frame2D, SlitGeometry, Spectrum1D,
    StandardResponse, TiltModel, TraceEdges, WaveSolution,
};
use crate::reduce::geometry;
use async_trait::async_trait;
use std::path::PathBuf;

/// The (exposure, detector) unit a collaborator call belongs to
#[derive(Debug, Clone, Copy)]
pub struct UnitContext<'a> {
    pub exposure: &'a ExposureMetadata,
    /// Detector index, from 1
    pub detector: usize,
    pub config: &'a InstrumentConfig,
}

impl UnitContext<'_> {
    pub fn exposure_index(&self) -> usize {
        self.exposure.index
    }
}

/// Calibration and extraction algorithms
///
/// Implementations are expected to be deterministic for identical inputs.
/// Calls for one unit arrive strictly in stage order.
#[async_trait]
pub trait Calibrator: Send + Sync {
    /// Resolve the trimmed amplifier data sections
    async fn amplifier_sections(&self, unit: &UnitContext<'_>) -> SlitredResult<AmplifierSections>;

    /// Combine the bias frames
    async fn compute_bias(&self, unit: &UnitContext<'_>) -> SlitredResult<Frame2D>;

    /// Build a bad pixel mask; `None` when the instrument provides none
    async fn compute_bad_pixel_mask(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
    ) -> SlitredResult<Option<Frame2D>>;

    /// Combine the arc frames
    async fn compute_arc(&self, unit: &UnitContext<'_>, bias: &Frame2D) -> SlitredResult<Frame2D>;

    /// Determine the dispersion axis and the frame shape after any transpose
    async fn dispersion_direction(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
    ) -> SlitredResult<Dispersion>;

    /// Combine the trace (slit illumination) frames
    async fn compute_trace(&self, unit: &UnitContext<'_>, bias: &Frame2D) -> SlitredResult<Frame2D>;

    /// Find the slit edges on the master trace
    async fn trace_slit_edges(
        &self,
        unit: &UnitContext<'_>,
        trace: &Frame2D,
    ) -> SlitredResult<TraceEdges>;

    /// Physical coordinate of each spatial pixel
    fn pixel_locations(&self, dispersion: &Dispersion) -> Vec<f64> {
        geometry::pixel_locations(dispersion.nspat)
    }

    /// Convert physical slit edges to pixel space
    fn derive_geometry(&self, edges: &TraceEdges, pixel_locations: &[f64]) -> SlitGeometry {
        geometry::derive_geometry(edges, pixel_locations)
    }

    /// Build the pixel-to-pixel flat field
    async fn compute_pixel_flat(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
        geometry: &SlitGeometry,
    ) -> SlitredResult<Frame2D>;

    /// One refinement of the spectral tilt model.
    ///
    /// `guess` is the previous iteration's tilts; `qa` is set only on the
    /// final iteration.
    async fn compute_tilt_model(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
        guess: Option<&Frame2D>,
        qa: bool,
    ) -> SlitredResult<TiltModel>;

    /// Set up arc line identification (line lists, initial dispersion)
    async fn arc_params(&self, unit: &UnitContext<'_>) -> SlitredResult<ArcParams>;

    /// Identify arc lines and fit the wavelength solution
    async fn wavelength_solution(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
        tilts: &TiltModel,
        params: &ArcParams,
    ) -> SlitredResult<WaveSolution>;

    /// Sensitivity function from the standard star observed with this setup
    async fn standard_response(&self, unit: &UnitContext<'_>) -> SlitredResult<StandardResponse>;

    /// Load the science frame, bias subtracted and oriented
    async fn load_science_frame(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
        dispersion: &Dispersion,
    ) -> SlitredResult<Frame2D>;

    /// Sky subtract and extract the science frame
    async fn reduce_science(
        &self,
        unit: &UnitContext<'_>,
        science: &Frame2D,
        calibrations: &DetectorState,
    ) -> SlitredResult<Vec<Spectrum1D>>;

    /// Flux calibrate extracted spectra in place
    async fn apply_flux(
        &self,
        unit: &UnitContext<'_>,
        spectra: &mut [Spectrum1D],
        response: &StandardResponse,
    ) -> SlitredResult<()>;
}

/// Destination for reduced exposures
#[async_trait]
pub trait SpectraSink: Send + Sync {
    /// Write the exposure's spectra, returning where they went
    async fn persist(&self, exposure: &ExposureState) -> SlitredResult<Option<PathBuf>>;
}
