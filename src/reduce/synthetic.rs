//! Deterministic synthetic calibrator
//!
//! Produces frames from the exposure metadata alone so the full reduction
//! flow can run without raw data. A straight slit is illuminated between
//! spatial pixels 4 and `nspat - 4`, arc lines fall on every 8th spectral
//! row and the science target is a Gaussian on the slit centre.
//!
//! Recognised header keywords:
//!
//! | keyword          | effect                                         |
//! |------------------|------------------------------------------------|
//! | `bias_level`     | bias level in counts (default 1000)            |
//! | `bpm`            | `false` disables the bad pixel mask            |
//! | `lamps`          | comma separated arc lamps                      |
//! | `wavecen`        | central wavelength in Angstrom (default 5500)  |
//! | `dispersion`     | Angstrom per pixel (default 1.5)               |
//! | `standard`       | standard star name (default `feige34`)         |
//! | `fail`           | step name that fails with a compute error      |
//! | `fail_detector`  | restrict `fail` to one detector                |

use crate::calib::CalibrationType;
use crate::error::{SlitredError, SlitredResult};
use crate::exposure::DetectorState;
use crate::frame::{
    AmplifierSections, ArcParams, Dispersion, Frame2D, SlitGeometry, Spectrum1D,
    StandardResponse, TiltModel, TraceEdges, WaveSolution,
};
use crate::reduce::calibrator::{Calibrator, UnitContext};
use async_trait::async_trait;
use tracing::debug;

const DEFAULT_BIAS: f64 = 1000.0;
const ARC_LINE_SPACING: usize = 8;
const ARC_LINE_COUNTS: f64 = 5000.0;
const ARC_SATURATION: f64 = 40000.0;
const SLIT_MARGIN: usize = 4;
const SKY_LEVEL: f64 = 100.0;
const OBJECT_PEAK: f64 = 500.0;
const OBJECT_SIGMA: f64 = 1.5;
const DEFAULT_LAMPS: &[&str] = &["HgI", "NeI", "ArI"];

/// Calibrator producing synthetic frames of a fixed shape
#[derive(Debug, Clone)]
pub struct SyntheticCalibrator {
    nspec: usize,
    nspat: usize,
}

impl Default for SyntheticCalibrator {
    fn default() -> Self {
        Self::new(64, 32)
    }
}

impl SyntheticCalibrator {
    /// Raw frames are `nspec` rows by `nspat` columns
    pub fn new(nspec: usize, nspat: usize) -> Self {
        Self { nspec, nspat }
    }

    /// Fail `step` when the exposure asks for it
    fn check(&self, unit: &UnitContext<'_>, step: &str) -> SlitredResult<()> {
        let Some(target) = unit.exposure.value_text("fail") else {
            return Ok(());
        };
        if target != step {
            return Ok(());
        }
        let on_detector = unit
            .exposure
            .value_f64("fail_detector")
            .map_or(true, |d| d as usize == unit.detector);
        if on_detector {
            return Err(SlitredError::compute(
                step,
                unit.exposure_index(),
                unit.detector,
                "requested by exposure metadata",
            ));
        }
        Ok(())
    }

    fn bias_level(&self, unit: &UnitContext<'_>) -> f64 {
        unit.exposure.value_f64("bias_level").unwrap_or(DEFAULT_BIAS) + 0.5 * unit.detector as f64
    }

    fn slit(&self, nspat: usize) -> std::ops::Range<usize> {
        SLIT_MARGIN..nspat.saturating_sub(SLIT_MARGIN)
    }
}

#[async_trait]
impl Calibrator for SyntheticCalibrator {
    async fn amplifier_sections(&self, unit: &UnitContext<'_>) -> SlitredResult<AmplifierSections> {
        self.check(unit, "amplifiers")?;
        let half = self.nspat / 2;
        Ok(AmplifierSections {
            sections: vec![[0, self.nspec, 0, half], [0, self.nspec, half, self.nspat]],
        })
    }

    async fn compute_bias(&self, unit: &UnitContext<'_>) -> SlitredResult<Frame2D> {
        self.check(unit, CalibrationType::Bias.label())?;
        Ok(Frame2D::filled(self.nspec, self.nspat, self.bias_level(unit)))
    }

    async fn compute_bad_pixel_mask(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
    ) -> SlitredResult<Option<Frame2D>> {
        self.check(unit, CalibrationType::BadPixelMask.label())?;
        if unit.exposure.get("bpm") == Some(&serde_json::Value::Bool(false)) {
            return Ok(None);
        }
        Ok(Some(Frame2D::from_fn(bias.nspec, bias.nspat, |i, j| {
            if (i * 7 + j * 3) % 97 == 0 {
                1.0
            } else {
                0.0
            }
        })))
    }

    async fn compute_arc(&self, unit: &UnitContext<'_>, bias: &Frame2D) -> SlitredResult<Frame2D> {
        self.check(unit, CalibrationType::Arc.label())?;
        let raw = Frame2D::from_fn(bias.nspec, bias.nspat, |i, j| {
            let line = if i % ARC_LINE_SPACING == 0 {
                ARC_LINE_COUNTS
            } else {
                10.0
            };
            bias.get(i, j) + line
        });
        raw.subtract(bias)
            .ok_or_else(|| SlitredError::compute("arc", unit.exposure_index(), unit.detector, "shape mismatch"))
    }

    async fn dispersion_direction(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
    ) -> SlitredResult<Dispersion> {
        self.check(unit, "dispersion")?;
        let transpose = arc.nspat > arc.nspec;
        let (nspec, nspat) = if transpose {
            (arc.nspat, arc.nspec)
        } else {
            (arc.nspec, arc.nspat)
        };
        Ok(Dispersion {
            transpose,
            nspec,
            nspat,
        })
    }

    async fn compute_trace(&self, unit: &UnitContext<'_>, bias: &Frame2D) -> SlitredResult<Frame2D> {
        self.check(unit, CalibrationType::Trace.label())?;
        let slit = self.slit(bias.nspat);
        Ok(Frame2D::from_fn(bias.nspec, bias.nspat, |_, j| {
            if slit.contains(&j) {
                1000.0
            } else {
                0.0
            }
        }))
    }

    async fn trace_slit_edges(
        &self,
        unit: &UnitContext<'_>,
        trace: &Frame2D,
    ) -> SlitredResult<TraceEdges> {
        self.check(unit, "edges")?;
        let peak = trace.data.iter().cloned().fold(0.0, f64::max);
        let threshold = 0.5 * peak;

        let mut left = Vec::with_capacity(trace.nspec);
        let mut right = Vec::with_capacity(trace.nspec);
        for i in 0..trace.nspec {
            let lit: Vec<usize> = (0..trace.nspat)
                .filter(|&j| peak > 0.0 && trace.get(i, j) > threshold)
                .collect();
            match (lit.first(), lit.last()) {
                (Some(&l), Some(&r)) => {
                    left.push(l as f64 - 0.5);
                    right.push(r as f64 + 0.5);
                }
                _ => {
                    return Err(SlitredError::compute(
                        "edges",
                        unit.exposure_index(),
                        unit.detector,
                        format!("no slit illumination on row {}", i),
                    ))
                }
            }
        }

        Ok(TraceEdges {
            left,
            right,
            orders: 1,
        })
    }

    async fn compute_pixel_flat(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
        geometry: &SlitGeometry,
    ) -> SlitredResult<Frame2D> {
        self.check(unit, CalibrationType::PixelFlat.label())?;
        Ok(Frame2D::from_fn(bias.nspec, bias.nspat, |i, j| {
            let inside = match (geometry.left.get(i), geometry.right.get(i)) {
                (Some(&l), Some(&r)) => (l..=r).contains(&j),
                _ => false,
            };
            if inside {
                1.0 + 0.01 * ((j % 5) as f64 - 2.0)
            } else {
                1.0
            }
        }))
    }

    async fn compute_tilt_model(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
        guess: Option<&Frame2D>,
        qa: bool,
    ) -> SlitredResult<TiltModel> {
        self.check(unit, CalibrationType::Tilt.label())?;
        let centre = arc.nspat as f64 / 2.0;
        let target = |j: usize| 0.01 * (j as f64 - centre);

        // Each iteration halves the distance to the target tilt
        let tilts = Frame2D::from_fn(arc.nspec, arc.nspat, |i, j| {
            let start = guess.map_or(0.0, |g| g.get(i, j));
            0.5 * (start + target(j))
        });
        let saturation = Frame2D::from_fn(arc.nspec, arc.nspat, |i, j| {
            if arc.get(i, j) >= ARC_SATURATION {
                1.0
            } else {
                0.0
            }
        });
        if qa {
            debug!(
                "Tilt QA for detector {}: mean tilt {:.5}",
                unit.detector,
                tilts.mean()
            );
        }
        Ok(TiltModel { tilts, saturation })
    }

    async fn arc_params(&self, unit: &UnitContext<'_>) -> SlitredResult<ArcParams> {
        self.check(unit, "arcparam")?;
        let lamps = match unit.exposure.value_text("lamps") {
            Some(list) => list
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            None => DEFAULT_LAMPS.iter().map(|l| l.to_string()).collect(),
        };
        Ok(ArcParams {
            lamps,
            central_wavelength: unit.exposure.value_f64("wavecen").unwrap_or(5500.0),
            dispersion: unit.exposure.value_f64("dispersion").unwrap_or(1.5),
        })
    }

    async fn wavelength_solution(
        &self,
        unit: &UnitContext<'_>,
        arc: &Frame2D,
        _tilts: &TiltModel,
        params: &ArcParams,
    ) -> SlitredResult<WaveSolution> {
        self.check(unit, CalibrationType::WavelengthSolution.label())?;
        if params.lamps.is_empty() {
            return Err(SlitredError::compute(
                "wave",
                unit.exposure_index(),
                unit.detector,
                "no arc lamps to identify lines with",
            ));
        }
        let start = params.central_wavelength - params.dispersion * arc.nspec as f64 / 2.0;
        Ok(WaveSolution {
            coefficients: vec![start, params.dispersion],
            rms: 0.05,
        })
    }

    async fn standard_response(&self, unit: &UnitContext<'_>) -> SlitredResult<StandardResponse> {
        self.check(unit, CalibrationType::StandardResponse.label())?;
        Ok(StandardResponse {
            name: unit
                .exposure
                .value_text("standard")
                .unwrap_or_else(|| "feige34".to_string()),
            sensitivity: vec![1e-17; self.nspec.max(self.nspat)],
        })
    }

    async fn load_science_frame(
        &self,
        unit: &UnitContext<'_>,
        bias: &Frame2D,
        dispersion: &Dispersion,
    ) -> SlitredResult<Frame2D> {
        if unit.exposure.filename.is_empty() {
            return Err(SlitredError::MissingMetadata {
                exposure: unit.exposure_index(),
                field: "filename".to_string(),
            });
        }
        if unit.exposure.value_text("fail").as_deref() == Some("science") {
            return Err(SlitredError::ScienceLoad {
                exposure: unit.exposure_index(),
                detector: unit.detector,
                reason: "requested by exposure metadata".to_string(),
            });
        }

        let centre = (bias.nspat / 2) as f64;
        let raw = Frame2D::from_fn(bias.nspec, bias.nspat, |i, j| {
            let x = (j as f64 - centre) / OBJECT_SIGMA;
            bias.get(i, j) + SKY_LEVEL + OBJECT_PEAK * (-0.5 * x * x).exp()
        });
        let science = raw.subtract(bias).ok_or_else(|| SlitredError::ScienceLoad {
            exposure: unit.exposure_index(),
            detector: unit.detector,
            reason: "science and bias shapes differ".to_string(),
        })?;

        Ok(if dispersion.transpose {
            science.transposed()
        } else {
            science
        })
    }

    async fn reduce_science(
        &self,
        unit: &UnitContext<'_>,
        science: &Frame2D,
        calibrations: &DetectorState,
    ) -> SlitredResult<Vec<Spectrum1D>> {
        self.check(unit, "reduce")?;
        let fail = |reason: &str| {
            SlitredError::compute("reduce", unit.exposure_index(), unit.detector, reason)
        };

        let geometry = calibrations
            .geometry
            .as_ref()
            .ok_or_else(|| fail("slit geometry missing"))?;
        let wave = calibrations
            .master(CalibrationType::WavelengthSolution)
            .ok_or_else(|| fail("wavelength solution missing"))?
            .as_wave()?;
        let flat = match calibrations.master(CalibrationType::PixelFlat) {
            Some(artifact) => Some(artifact.as_frame()?),
            None => None,
        };
        if geometry.left.len() != science.nspec {
            return Err(fail("slit trace does not cover the science frame"));
        }

        let mut wavelength = Vec::with_capacity(science.nspec);
        let mut counts = Vec::with_capacity(science.nspec);
        for i in 0..science.nspec {
            let (l, r) = (geometry.left[i], geometry.right[i].min(science.nspat - 1));
            let flat_at = |j: usize| flat.map_or(1.0, |f| f.get(i, j)).max(f64::EPSILON);
            let row: Vec<f64> = (l..=r).map(|j| science.get(i, j) / flat_at(j)).collect();
            let sky = row.iter().cloned().fold(f64::INFINITY, f64::min);
            let sky = if sky.is_finite() { sky } else { 0.0 };

            wavelength.push(wave.wavelength(i as f64));
            counts.push(row.iter().map(|v| v - sky).sum());
        }

        Ok(vec![Spectrum1D {
            detector: unit.detector,
            wavelength,
            counts,
            flux: None,
        }])
    }

    async fn apply_flux(
        &self,
        unit: &UnitContext<'_>,
        spectra: &mut [Spectrum1D],
        response: &StandardResponse,
    ) -> SlitredResult<()> {
        self.check(unit, "flux")?;
        for spectrum in spectra.iter_mut() {
            let flux = spectrum
                .counts
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let s = response
                        .sensitivity
                        .get(i)
                        .or(response.sensitivity.last())
                        .copied()
                        .unwrap_or(0.0);
                    c * s
                })
                .collect();
            spectrum.flux = Some(flux);
        }
        Ok(())
    }
}
