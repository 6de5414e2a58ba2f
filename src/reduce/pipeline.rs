//! Multi-exposure reduction orchestrator
//!
//! Walks the science exposures in input order and, for each one, every
//! detector of the mosaic in index order. One exposure is fully reduced,
//! written and released before the next starts. Master frames persist
//! across exposures in a single [`MasterFrameCache`].

use crate::calib::{derive_key, CalibrationType, MasterFrameCache, Propagator};
use crate::config::schema::{Config, MosaicConfig};
use crate::error::SlitredResult;
use crate::exposure::{ExposureMetadata, ExposureState};
use crate::reduce::calibrator::{Calibrator, SpectraSink};
use crate::reduce::diagnostics::Diagnostics;
use crate::reduce::report::{ExposureOutcome, ExposureReport, MasterSummary, RunSummary, UnitReport};
use crate::reduce::sequencer::{Sequencer, SequencerPolicy};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Run-level options
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub reuse_master: bool,
    pub prep_only: bool,
    pub stale_fallback: bool,
    /// Propagation tags; identity for unlisted types
    pub tags: BTreeMap<CalibrationType, CalibrationType>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reuse_master: false,
            prep_only: false,
            stale_fallback: true,
            tags: BTreeMap::new(),
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &Config) -> SlitredResult<Self> {
        Ok(Self {
            reuse_master: config.reduce.reuse_master,
            prep_only: config.reduce.prep_only,
            stale_fallback: config.reduce.stale_fallback,
            tags: config.propagation.resolve()?,
        })
    }
}

type ExposureCallback<'a> = Box<dyn Fn(&ExposureReport) + Send + Sync + 'a>;

/// Reduction orchestrator
pub struct Pipeline<'a> {
    calibrator: &'a dyn Calibrator,
    sink: &'a dyn SpectraSink,
    diagnostics: &'a dyn Diagnostics,
    mosaic: MosaicConfig,
    options: RunOptions,
    cache: MasterFrameCache,
    on_exposure: Option<ExposureCallback<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        calibrator: &'a dyn Calibrator,
        sink: &'a dyn SpectraSink,
        diagnostics: &'a dyn Diagnostics,
        mosaic: MosaicConfig,
        options: RunOptions,
    ) -> Self {
        Self {
            calibrator,
            sink,
            diagnostics,
            mosaic,
            options,
            cache: MasterFrameCache::new(),
            on_exposure: None,
        }
    }

    /// Called after each exposure is finished
    pub fn on_exposure(mut self, callback: impl Fn(&ExposureReport) + Send + Sync + 'a) -> Self {
        self.on_exposure = Some(Box::new(callback));
        self
    }

    /// Master frames held after (or during) a run
    pub fn cache(&self) -> &MasterFrameCache {
        &self.cache
    }

    /// Reduce every exposure.
    ///
    /// Never aborts on a unit failure; the summary status is 0 only when
    /// every unit of every exposure completed.
    pub async fn run(&mut self, exposures: Vec<ExposureMetadata>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Run {}: {} exposure(s) on {} detector(s), reuse_master={}",
            run_id,
            exposures.len(),
            self.mosaic.ndet,
            self.options.reuse_master
        );

        let mut states = self.setup(exposures);

        let calibrator = self.calibrator;
        let sink = self.sink;
        let diagnostics = self.diagnostics;
        let mosaic = self.mosaic.clone();
        let propagator =
            Propagator::new(self.options.reuse_master).with_tags(self.options.tags.clone());
        let sequencer = Sequencer::new(
            calibrator,
            diagnostics,
            &propagator,
            &mosaic,
            SequencerPolicy {
                prep_only: self.options.prep_only,
                stale_fallback: self.options.stale_fallback,
            },
        );

        let mut reports = Vec::with_capacity(states.len());
        for sc in 0..states.len() {
            let (head, pending) = states.split_at_mut(sc + 1);
            let Some(exposure) = head[sc].as_mut() else {
                continue;
            };
            info!(
                "Reducing file {}, target {}",
                exposure.metadata.filename, exposure.metadata.target
            );

            let mut units = Vec::with_capacity(mosaic.ndet);
            for detector in 1..=mosaic.ndet {
                info!("Working on detector {}", detector);
                let unit = sequencer
                    .run_unit(&mut self.cache, exposure, pending, detector)
                    .await;
                units.push(unit);
            }

            exposure.mark_processed();
            let report = finish_exposure(sink, diagnostics, exposure, units).await;
            if let Some(callback) = &self.on_exposure {
                callback(&report);
            }
            reports.push(report);
            states[sc] = None;
        }

        let ok = reports
            .iter()
            .all(|r| r.error.is_none() && r.units.iter().all(UnitReport::succeeded));
        let status = if ok { 0 } else { 1 };
        if ok {
            info!("Run {} completed", run_id);
        } else {
            warn!("Run {} finished with failures", run_id);
        }

        RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status,
            reuse_master: self.options.reuse_master,
            prep_only: self.options.prep_only,
            exposures: reports,
            masters: self.cache.records().into_iter().map(MasterSummary::from).collect(),
        }
    }

    /// Build an exposure state per input exposure. Exposures are renumbered
    /// by position so that skipped manifest entries leave no gaps.
    fn setup(&self, exposures: Vec<ExposureMetadata>) -> Vec<Option<ExposureState>> {
        exposures
            .into_iter()
            .enumerate()
            .map(|(index, mut metadata)| {
                metadata.index = index;
                let configs = (1..=self.mosaic.ndet)
                    .filter_map(|det| match derive_key(&metadata, &self.mosaic, det) {
                        Ok(config) => Some((det, config)),
                        Err(e) => {
                            warn!("Exposure {} detector {}: {}", index, det, e);
                            None
                        }
                    })
                    .collect();
                Some(ExposureState::new(metadata, configs))
            })
            .collect()
    }
}

/// Persist the exposure, close its QA and release its arrays
async fn finish_exposure(
    sink: &dyn SpectraSink,
    diagnostics: &dyn Diagnostics,
    exposure: &mut ExposureState,
    units: Vec<UnitReport>,
) -> ExposureReport {
    let index = exposure.index();
    let mut report = ExposureReport {
        index,
        filename: exposure.metadata.filename.clone(),
        target: exposure.metadata.target.clone(),
        outcome: ExposureReport::outcome_of(&units),
        units,
        output: None,
        error: None,
    };

    if report.outcome == ExposureOutcome::Failed {
        warn!("Exposure {} has no reduced detectors; nothing written", index);
    } else if exposure.spectra().is_empty() {
        debug!("No spectra to write for exposure {}", index);
    } else {
        match sink.persist(exposure).await {
            Ok(path) => report.output = path,
            Err(e) => {
                error!("Failed to write exposure {}: {}", index, e);
                report.error = Some(e.to_string());
                report.outcome = ExposureOutcome::Failed;
            }
        }
    }

    diagnostics.close(index).await;
    exposure.release();
    report
}
