//! Detector reduction sequencer
//!
//! Drives one (exposure, detector) unit through the stages in [`Stage`]
//! order. Calibration stages consult the master frame cache first and only
//! call the [`Calibrator`] when the frame must be (re)computed; every fresh
//! computation is stored and propagated to the exposures still pending.
//!
//! A failing stage abandons the unit: its detector slot is cleared and the
//! error is returned in the [`UnitReport`]. Other units are unaffected.

use crate::calib::{
    derive_key, CalibrationType, MasterArtifact, MasterFrameCache, MasterFrameRecord, Propagator,
};
use crate::config::schema::MosaicConfig;
use crate::error::{SlitredError, SlitredResult};
use crate::exposure::{DetectorState, ExposureState};
use crate::frame::{Frame2D, TiltModel};
use crate::reduce::calibrator::{Calibrator, UnitContext};
use crate::reduce::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::reduce::report::UnitReport;
use crate::reduce::stage::Stage;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Tilt refinement iterations. Fixed; not adaptive to residuals.
pub const TILT_ITERATIONS: usize = 2;

/// Run-level switches applied to every unit
#[derive(Debug, Clone, Copy, Default)]
pub struct SequencerPolicy {
    /// Stop after the wavelength solution
    pub prep_only: bool,
    /// Bind an existing master frame when its recompute fails
    pub stale_fallback: bool,
}

/// Cache decision for one calibration stage
enum Decision {
    Reuse {
        record: MasterFrameRecord,
        degraded: bool,
    },
    Compute {
        previous: Option<MasterFrameRecord>,
    },
}

/// Mutable state of a unit in flight
struct UnitRun<'r> {
    cache: &'r mut MasterFrameCache,
    /// Exposures after the current one, in traversal order
    pending: &'r mut [Option<ExposureState>],
    /// Slots of this detector satisfied by propagation
    satisfied: BTreeSet<CalibrationType>,
    state: DetectorState,
    report: UnitReport,
    stage: Stage,
}

/// State machine for one (exposure, detector) pair
pub struct Sequencer<'a> {
    calibrator: &'a dyn Calibrator,
    diagnostics: &'a dyn Diagnostics,
    propagator: &'a Propagator,
    mosaic: &'a MosaicConfig,
    policy: SequencerPolicy,
}

impl<'a> Sequencer<'a> {
    pub fn new(
        calibrator: &'a dyn Calibrator,
        diagnostics: &'a dyn Diagnostics,
        propagator: &'a Propagator,
        mosaic: &'a MosaicConfig,
        policy: SequencerPolicy,
    ) -> Self {
        Self {
            calibrator,
            diagnostics,
            propagator,
            mosaic,
            policy,
        }
    }

    /// Reduce one detector of `exposure`.
    ///
    /// `pending` holds the exposures not yet processed; they receive update
    /// propagation for every master frame computed here.
    pub async fn run_unit(
        &self,
        cache: &mut MasterFrameCache,
        exposure: &mut ExposureState,
        pending: &mut [Option<ExposureState>],
        detector: usize,
    ) -> UnitReport {
        let index = exposure.index();
        let mut report = UnitReport::new(index, detector);

        let config = match exposure
            .config(detector)
            .cloned()
            .map(Ok)
            .unwrap_or_else(|| derive_key(&exposure.metadata, self.mosaic, detector))
        {
            Ok(config) => config,
            Err(e) => {
                warn!("Skipping detector {} of exposure {}: {}", detector, index, e);
                let stage = Stage::AmplifierSectionsResolved;
                report.failed_at = Some(stage);
                report.error = Some(e.to_string());
                self.diagnostics
                    .record(DiagnosticEvent::UnitFailed {
                        exposure: index,
                        detector,
                        stage,
                        error: e.to_string(),
                    })
                    .await;
                exposure.clear_detector(detector);
                return report;
            }
        };
        report.config = Some(config.clone());

        let satisfied = CalibrationType::all()
            .iter()
            .copied()
            .filter(|kind| exposure.is_satisfied(detector, *kind))
            .collect();

        let mut run = UnitRun {
            cache,
            pending,
            satisfied,
            state: DetectorState::new(detector, config.clone()),
            report,
            stage: Stage::AmplifierSectionsResolved,
        };

        let ctx = UnitContext {
            exposure: &exposure.metadata,
            detector,
            config: &config,
        };
        let result = self.drive(&ctx, &mut run).await;

        let UnitRun {
            state,
            mut report,
            stage,
            ..
        } = run;

        match result {
            Ok(()) => exposure.store_detector(state),
            Err(e) => {
                error!(
                    "Exposure {} detector {} failed at {}: {}",
                    index, detector, stage, e
                );
                report.failed_at = Some(stage);
                report.error = Some(e.to_string());
                self.diagnostics
                    .record(DiagnosticEvent::UnitFailed {
                        exposure: index,
                        detector,
                        stage,
                        error: e.to_string(),
                    })
                    .await;
                exposure.clear_detector(detector);
            }
        }
        report
    }

    async fn drive(&self, ctx: &UnitContext<'_>, run: &mut UnitRun<'_>) -> SlitredResult<()> {
        let calibrator = self.calibrator;
        let diagnostics = self.diagnostics;

        run.stage = Stage::AmplifierSectionsResolved;
        run.state.amplifiers = Some(calibrator.amplifier_sections(ctx).await?);
        self.reached(ctx, run).await;

        run.stage = Stage::BiasReady;
        let bias = self
            .require(ctx, run, CalibrationType::Bias, move || async move {
                calibrator
                    .compute_bias(ctx)
                    .await
                    .map(|f| Some(MasterArtifact::Frame(f)))
            })
            .await?;
        let bias_frame = bias.as_frame()?;
        self.reached(ctx, run).await;

        run.stage = Stage::BadPixelMaskReady;
        self.resolve(ctx, run, CalibrationType::BadPixelMask, move || async move {
            calibrator
                .compute_bad_pixel_mask(ctx, bias_frame)
                .await
                .map(|mask| mask.map(MasterArtifact::Frame))
        })
        .await?;
        self.reached(ctx, run).await;

        run.stage = Stage::ArcReady;
        let arc = self
            .require(ctx, run, CalibrationType::Arc, move || async move {
                calibrator
                    .compute_arc(ctx, bias_frame)
                    .await
                    .map(|f| Some(MasterArtifact::Frame(f)))
            })
            .await?;
        let arc_frame = arc.as_frame()?;
        self.reached(ctx, run).await;

        run.stage = Stage::DispersionDirectionKnown;
        let dispersion = calibrator.dispersion_direction(ctx, arc_frame).await?;
        run.state.dispersion = Some(dispersion);
        if run.state.master(CalibrationType::BadPixelMask).is_none() {
            debug!(
                "No bad pixel mask for detector {}; using an empty {}x{} mask",
                ctx.detector, dispersion.nspec, dispersion.nspat
            );
            run.state.bad_pixels = Some(Frame2D::zeros(dispersion.nspec, dispersion.nspat));
        }
        self.reached(ctx, run).await;

        run.stage = Stage::TraceReady;
        let trace = self
            .require(ctx, run, CalibrationType::Trace, move || async move {
                calibrator
                    .compute_trace(ctx, bias_frame)
                    .await
                    .map(|f| Some(MasterArtifact::Frame(f)))
            })
            .await?;
        self.reached(ctx, run).await;

        run.stage = Stage::GeometryDerived;
        let edges = calibrator.trace_slit_edges(ctx, trace.as_frame()?).await?;
        let locations = calibrator.pixel_locations(&dispersion);
        info!("Converting physical trace locations to nearest pixel");
        let geometry = calibrator.derive_geometry(&edges, &locations);
        diagnostics
            .record(DiagnosticEvent::SlitTrace {
                exposure: ctx.exposure_index(),
                detector: ctx.detector,
                orders: edges.orders,
                width: geometry.width,
            })
            .await;
        run.state.trace = Some(edges);
        run.state.geometry = Some(geometry.clone());
        self.reached(ctx, run).await;

        run.stage = Stage::FlatReady;
        self.require(ctx, run, CalibrationType::PixelFlat, move || async move {
            calibrator
                .compute_pixel_flat(ctx, bias_frame, &geometry)
                .await
                .map(|f| Some(MasterArtifact::Frame(f)))
        })
        .await?;
        self.reached(ctx, run).await;

        run.stage = Stage::TiltConverged;
        let tilt = self
            .require(ctx, run, CalibrationType::Tilt, move || async move {
                converge_tilts(calibrator, diagnostics, ctx, arc_frame)
                    .await
                    .map(|model| Some(MasterArtifact::Tilt(model)))
            })
            .await?;
        if run.report.computed.contains(&CalibrationType::Tilt) {
            run.state.tilt.iterations = TILT_ITERATIONS;
            run.report.tilt_iterations = TILT_ITERATIONS;
        } else {
            run.state.tilt.reused = true;
        }
        let tilt_model = tilt.as_tilt()?;
        self.reached(ctx, run).await;

        run.stage = Stage::ArcParamReady;
        if matches!(
            self.decide(ctx, run, CalibrationType::WavelengthSolution),
            Decision::Compute { .. }
        ) {
            run.state.arc_params = Some(calibrator.arc_params(ctx).await?);
        } else {
            debug!("Wavelength solution is cached; arc line setup not needed");
        }
        self.reached(ctx, run).await;

        run.stage = Stage::WavelengthSolutionReady;
        let params = run.state.arc_params.clone();
        self.require(ctx, run, CalibrationType::WavelengthSolution, move || async move {
            let params = params.ok_or_else(|| {
                SlitredError::Internal("arc line parameters were not prepared".to_string())
            })?;
            calibrator
                .wavelength_solution(ctx, arc_frame, tilt_model, &params)
                .await
                .map(|w| Some(MasterArtifact::Wave(w)))
        })
        .await?;
        self.reached(ctx, run).await;

        info!("All calibration frames have been prepared");
        if self.policy.prep_only {
            info!(
                "Preparation only: skipping science stages for exposure {} detector {}",
                ctx.exposure_index(),
                ctx.detector
            );
            run.report.prep_only = true;
            return Ok(());
        }

        run.stage = Stage::StandardReady;
        info!("Processing standard star");
        warn!("Assuming one standard star per detector mosaic");
        let response = self
            .require(ctx, run, CalibrationType::StandardResponse, move || async move {
                calibrator
                    .standard_response(ctx)
                    .await
                    .map(|r| Some(MasterArtifact::Response(r)))
            })
            .await?;
        self.reached(ctx, run).await;

        run.stage = Stage::ScienceLoaded;
        info!("Loading science frame");
        let science = calibrator
            .load_science_frame(ctx, bias_frame, &dispersion)
            .await?;
        run.state.science = Some(science);
        self.reached(ctx, run).await;

        run.stage = Stage::ScienceReduced;
        info!("Processing science frame");
        let science = run
            .state
            .science
            .as_ref()
            .ok_or_else(|| SlitredError::Internal("science frame missing".to_string()))?;
        let spectra = calibrator.reduce_science(ctx, science, &run.state).await?;
        run.state.spectra = spectra;
        info!("A heliocentric correction will not be performed");
        warn!("Flexure correction is not applied");
        self.reached(ctx, run).await;

        run.stage = Stage::FluxCalibrated;
        let response = response.as_response()?;
        info!("Fluxing with {}", response.name);
        calibrator
            .apply_flux(ctx, &mut run.state.spectra, response)
            .await?;
        self.reached(ctx, run).await;

        run.stage = Stage::Done;
        self.reached(ctx, run).await;
        Ok(())
    }

    async fn reached(&self, ctx: &UnitContext<'_>, run: &mut UnitRun<'_>) {
        run.report.reached = Some(run.stage);
        debug!(
            "Exposure {} detector {}: {}",
            ctx.exposure_index(),
            ctx.detector,
            run.stage
        );
        self.diagnostics
            .record(DiagnosticEvent::StageReached {
                exposure: ctx.exposure_index(),
                detector: ctx.detector,
                stage: run.stage,
            })
            .await;
    }

    fn decide(&self, ctx: &UnitContext<'_>, run: &UnitRun<'_>, kind: CalibrationType) -> Decision {
        let Some(record) = run.cache.lookup(ctx.config, ctx.detector, kind) else {
            return Decision::Compute { previous: None };
        };
        let record = record.clone();

        if record.is_fresh() {
            if self.propagator.reuse_master() || record.owner == ctx.exposure_index() {
                Decision::Reuse {
                    record,
                    degraded: false,
                }
            } else {
                Decision::Compute {
                    previous: Some(record),
                }
            }
        } else if run.satisfied.contains(&kind) {
            Decision::Reuse {
                record,
                degraded: true,
            }
        } else {
            Decision::Compute {
                previous: Some(record),
            }
        }
    }

    /// Like [`Self::resolve`], for stages that must produce a master frame
    async fn require<F, Fut>(
        &self,
        ctx: &UnitContext<'_>,
        run: &mut UnitRun<'_>,
        kind: CalibrationType,
        compute: F,
    ) -> SlitredResult<Arc<MasterArtifact>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SlitredResult<Option<MasterArtifact>>>,
    {
        self.resolve(ctx, run, kind, compute)
            .await?
            .ok_or_else(|| SlitredError::Internal(format!("{} produced no master frame", kind)))
    }

    /// Bind the master frame of `kind`, computing it when the cache cannot
    /// serve this exposure.
    async fn resolve<F, Fut>(
        &self,
        ctx: &UnitContext<'_>,
        run: &mut UnitRun<'_>,
        kind: CalibrationType,
        compute: F,
    ) -> SlitredResult<Option<Arc<MasterArtifact>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SlitredResult<Option<MasterArtifact>>>,
    {
        let previous = match self.decide(ctx, run, kind) {
            Decision::Reuse { record, degraded } => {
                if degraded {
                    let reason = format!("reused stale master from exposure {}", record.owner);
                    self.bind_degraded(ctx, run, &record, reason).await;
                } else {
                    self.bind_reused(ctx, run, &record).await;
                }
                return Ok(Some(record.artifact));
            }
            Decision::Compute { previous } => previous,
        };

        self.check_dependencies(ctx, run, kind).await?;

        match compute().await {
            Ok(Some(artifact)) => {
                let record = run.cache.put(
                    ctx.config,
                    ctx.detector,
                    kind,
                    artifact,
                    ctx.exposure_index(),
                );
                for event in run.cache.drain_updates() {
                    self.propagator.on_update(&event, &mut *run.pending);
                }
                run.report.computed.push(kind);
                run.state.bind(kind, Arc::clone(&record.artifact));
                self.diagnostics
                    .record(DiagnosticEvent::MasterComputed {
                        exposure: ctx.exposure_index(),
                        detector: ctx.detector,
                        kind,
                        name: record.key.name(),
                        digest: record.artifact.digest(),
                    })
                    .await;
                Ok(Some(record.artifact))
            }
            Ok(None) => {
                debug!("No {} produced for detector {}", kind, ctx.detector);
                Ok(None)
            }
            Err(err) => match previous.filter(|r| self.policy.stale_fallback && !r.is_fresh()) {
                Some(record) => {
                    let reason = format!("recompute failed: {}", err);
                    self.bind_degraded(ctx, run, &record, reason).await;
                    Ok(Some(record.artifact))
                }
                None => Err(err),
            },
        }
    }

    async fn bind_reused(&self, ctx: &UnitContext<'_>, run: &mut UnitRun<'_>, record: &MasterFrameRecord) {
        debug!(
            "Using cached {} from exposure {}",
            record.key.name(),
            record.owner
        );
        run.report.reused.push(record.key.kind);
        run.state.bind(record.key.kind, Arc::clone(&record.artifact));
        self.diagnostics
            .record(DiagnosticEvent::MasterReused {
                exposure: ctx.exposure_index(),
                detector: ctx.detector,
                kind: record.key.kind,
                name: record.key.name(),
                digest: record.artifact.digest(),
                owner: record.owner,
                freshness: record.freshness,
            })
            .await;
    }

    async fn bind_degraded(
        &self,
        ctx: &UnitContext<'_>,
        run: &mut UnitRun<'_>,
        record: &MasterFrameRecord,
        reason: String,
    ) {
        warn!(
            "Using {} master {} in degraded mode: {}",
            record.freshness,
            record.key.name(),
            reason
        );
        run.report.reused.push(record.key.kind);
        run.report.degraded.push(record.key.kind);
        run.state.bind(record.key.kind, Arc::clone(&record.artifact));
        self.diagnostics
            .record(DiagnosticEvent::StaleMaster {
                exposure: ctx.exposure_index(),
                detector: ctx.detector,
                kind: record.key.kind,
                name: record.key.name(),
                reason,
            })
            .await;
    }

    /// Every dependency must have a master frame; stale ones are used with a
    /// warning.
    async fn check_dependencies(
        &self,
        ctx: &UnitContext<'_>,
        run: &UnitRun<'_>,
        kind: CalibrationType,
    ) -> SlitredResult<()> {
        for dep in kind.dependencies() {
            let stale_name = match run.cache.lookup(ctx.config, ctx.detector, *dep) {
                None => {
                    return Err(SlitredError::DependencyMissing {
                        kind,
                        missing: *dep,
                        config: ctx.config.to_string(),
                        detector: ctx.detector,
                    })
                }
                Some(record) if !record.is_fresh() => record.key.name(),
                Some(_) => continue,
            };
            warn!(
                "{} depends on stale {}; no fresher master is available",
                kind, stale_name
            );
            self.diagnostics
                .record(DiagnosticEvent::StaleMaster {
                    exposure: ctx.exposure_index(),
                    detector: ctx.detector,
                    kind: *dep,
                    name: stale_name,
                    reason: format!("stale dependency of {}", kind),
                })
                .await;
        }
        Ok(())
    }
}

/// Refine the tilt model a fixed number of times, each iteration starting
/// from the previous result. QA is requested on the last iteration only.
async fn converge_tilts(
    calibrator: &dyn Calibrator,
    diagnostics: &dyn Diagnostics,
    ctx: &UnitContext<'_>,
    arc: &Frame2D,
) -> SlitredResult<TiltModel> {
    let mut model: Option<TiltModel> = None;

    for iteration in 1..=TILT_ITERATIONS {
        info!(
            "Iterating on spectral tilts -- Iteration {}/{}",
            iteration, TILT_ITERATIONS
        );
        diagnostics
            .record(DiagnosticEvent::TiltIteration {
                exposure: ctx.exposure_index(),
                detector: ctx.detector,
                iteration,
                of: TILT_ITERATIONS,
            })
            .await;
        let qa = iteration == TILT_ITERATIONS;
        let guess = model.as_ref().map(|m| &m.tilts);
        let next = calibrator.compute_tilt_model(ctx, arc, guess, qa).await?;
        model = Some(next);
    }

    diagnostics
        .record(DiagnosticEvent::TiltQa {
            exposure: ctx.exposure_index(),
            detector: ctx.detector,
            iterations: TILT_ITERATIONS,
        })
        .await;

    model.ok_or_else(|| SlitredError::Internal("tilt model did not converge".to_string()))
}
