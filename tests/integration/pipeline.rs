//! Orchestrator scenarios driven through recording doubles

use crate::support::{all_types, exposure, mosaic, MemorySink, RecordingCalibrator};
use serde_json::json;
use slitred::calib::{CalibrationType, InstrumentConfig};
use slitred::exposure::ExposureMetadata;
use slitred::reduce::{
    DiagnosticEvent, ExposureOutcome, MemoryDiagnostics, Pipeline, RunOptions, RunSummary, Stage,
    TILT_ITERATIONS,
};
use std::sync::Mutex;

const CALIBRATION_STEPS: &[&str] = &[
    "bias", "badpix", "arc", "trace", "pixflat", "tilts", "arcparam", "wave", "standard",
];

fn options(reuse_master: bool) -> RunOptions {
    RunOptions {
        reuse_master,
        ..RunOptions::default()
    }
}

async fn run(
    calibrator: &RecordingCalibrator,
    sink: &MemorySink,
    diagnostics: &MemoryDiagnostics,
    ndet: usize,
    options: RunOptions,
    exposures: Vec<ExposureMetadata>,
) -> RunSummary {
    let mut pipeline = Pipeline::new(calibrator, sink, diagnostics, mosaic(ndet), options);
    pipeline.run(exposures).await
}

fn computed_digest(events: &[DiagnosticEvent], exposure: usize, kind: CalibrationType) -> String {
    events
        .iter()
        .find_map(|e| match e {
            DiagnosticEvent::MasterComputed {
                exposure: x,
                kind: k,
                digest,
                ..
            } if *x == exposure && *k == kind => Some(digest.clone()),
            _ => None,
        })
        .expect("master was computed")
}

#[tokio::test]
async fn reuse_enabled_computes_each_master_once() {
    let calibrator = RecordingCalibrator::new();
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        1,
        options(true),
        vec![exposure("a.fits", 45.0), exposure("b.fits", 45.0)],
    )
    .await;

    assert_eq!(summary.status, 0);
    let second = calibrator.steps(1, 1);
    for step in CALIBRATION_STEPS {
        assert!(!second.contains(step), "{} recomputed: {:?}", step, second);
    }
    assert!(second.contains(&"science"));

    let unit = &summary.exposures[1].units[0];
    assert!(unit.computed.is_empty());
    assert_eq!(unit.reused.len(), all_types().len());
    assert_eq!(unit.tilt_iterations, 0);
    assert!(unit.degraded.is_empty());
}

#[tokio::test]
async fn reuse_disabled_recomputes_every_master() {
    let calibrator = RecordingCalibrator::new();
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        1,
        options(false),
        vec![exposure("a.fits", 45.0), exposure("b.fits", 45.0)],
    )
    .await;

    assert_eq!(summary.status, 0);
    let second = calibrator.steps(1, 1);
    for step in CALIBRATION_STEPS {
        assert!(second.contains(step), "{} not recomputed", step);
    }
    let unit = &summary.exposures[1].units[0];
    assert_eq!(unit.computed.len(), all_types().len());
    assert!(unit.reused.is_empty());
}

#[tokio::test]
async fn identical_setup_reuses_identical_bias() {
    let calibrator = RecordingCalibrator::new();
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();
    let setup = |name: &str| {
        ExposureMetadata::new(name, "feige34")
            .with("slitwid", json!("1.2"))
            .with("dichroic", json!("3"))
            .with("disperser", json!("0"))
            .with("cdangle", json!(45))
    };

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        1,
        options(true),
        vec![setup("a.fits"), setup("b.fits")],
    )
    .await;

    let expected = InstrumentConfig::new("S12-D3-G0-T45-B11");
    assert_eq!(summary.exposures[0].units[0].config.as_ref(), Some(&expected));
    assert_eq!(summary.exposures[1].units[0].config.as_ref(), Some(&expected));

    let events = diagnostics.events();
    let digest = computed_digest(&events, 0, CalibrationType::Bias);
    let reused = events
        .iter()
        .find_map(|e| match e {
            DiagnosticEvent::MasterReused {
                exposure: 1,
                kind: CalibrationType::Bias,
                name,
                digest,
                owner,
                ..
            } => Some((name.clone(), digest.clone(), *owner)),
            _ => None,
        })
        .expect("bias reused by the second exposure");

    assert_eq!(reused.0, "Masterbias_S12-D3-G0-T45-B11_01");
    assert_eq!(reused.1, digest);
    assert_eq!(reused.2, 0);
}

#[tokio::test]
async fn tilt_waits_for_arc_and_runs_two_iterations() {
    let calibrator = RecordingCalibrator::new();
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        2,
        options(false),
        vec![exposure("a.fits", 45.0)],
    )
    .await;
    assert_eq!(summary.status, 0);

    for detector in 1..=2 {
        let steps = calibrator.steps(0, detector);
        let arc = steps.iter().position(|s| *s == "arc").unwrap();
        let tilt = steps.iter().position(|s| *s == "tilts").unwrap();
        let wave = steps.iter().position(|s| *s == "wave").unwrap();
        assert!(arc < tilt && tilt < wave, "order: {:?}", steps);

        let tilts = calibrator.tilt_calls(0, detector);
        assert_eq!(tilts.len(), TILT_ITERATIONS);
        assert!(!tilts[0].with_guess && !tilts[0].qa);
        assert!(tilts[1].with_guess && tilts[1].qa);
    }

    let events = diagnostics.events();
    let qa = events
        .iter()
        .filter(|e| matches!(e, DiagnosticEvent::TiltQa { .. }))
        .count();
    assert_eq!(qa, 2);
    assert_eq!(summary.exposures[0].units[0].tilt_iterations, 2);
}

#[tokio::test]
async fn failed_detector_is_isolated() {
    let calibrator = RecordingCalibrator::new().failing(0, 2, "wave");
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        2,
        options(false),
        vec![exposure("a.fits", 45.0), exposure("b.fits", 45.0)],
    )
    .await;

    assert_eq!(summary.status, 1);

    let a = &summary.exposures[0];
    assert_eq!(a.outcome, ExposureOutcome::Partial);
    assert_eq!(a.units[1].failed_at, Some(Stage::WavelengthSolutionReady));
    assert!(a.units[0].succeeded());
    assert!(a.output.is_some());

    let b = &summary.exposures[1];
    assert_eq!(b.outcome, ExposureOutcome::Completed);
    assert!(b.units.iter().all(|u| u.succeeded()));

    let persisted = sink.persisted();
    assert_eq!(persisted[0].detectors, vec![1]);
    assert_eq!(persisted[1].detectors, vec![1, 2]);

    // The failing unit stops at the wavelength solution
    let steps = calibrator.steps(0, 2);
    assert_eq!(steps.last(), Some(&"wave"));
}

#[tokio::test]
async fn exposure_without_detectors_has_no_output() {
    let calibrator = RecordingCalibrator::new().failing(0, 1, "wave");
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        1,
        options(false),
        vec![exposure("a.fits", 45.0), exposure("b.fits", 30.0)],
    )
    .await;

    assert_eq!(summary.status, 1);
    assert_eq!(summary.exposures[0].outcome, ExposureOutcome::Failed);
    assert!(summary.exposures[0].output.is_none());
    assert!(summary.exposures[1].output.is_some());

    let persisted: Vec<usize> = sink.persisted().iter().map(|p| p.exposure).collect();
    assert_eq!(persisted, vec![1]);
    assert!(diagnostics
        .events()
        .iter()
        .any(|e| matches!(e, DiagnosticEvent::UnitFailed { exposure: 0, .. })));
}

#[tokio::test]
async fn failed_recompute_falls_back_to_stale_master() {
    let calibrator = RecordingCalibrator::new().failing(1, 1, "wave");
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        1,
        options(false),
        vec![exposure("a.fits", 45.0), exposure("b.fits", 45.0)],
    )
    .await;

    assert_eq!(summary.status, 0);
    let unit = &summary.exposures[1].units[0];
    assert_eq!(unit.degraded, vec![CalibrationType::WavelengthSolution]);
    assert!(unit.reused.contains(&CalibrationType::WavelengthSolution));
    assert!(diagnostics.events().iter().any(|e| matches!(
        e,
        DiagnosticEvent::StaleMaster {
            exposure: 1,
            kind: CalibrationType::WavelengthSolution,
            ..
        }
    )));
}

#[tokio::test]
async fn failed_recompute_without_fallback_fails_the_unit() {
    let calibrator = RecordingCalibrator::new().failing(1, 1, "wave");
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        1,
        RunOptions {
            stale_fallback: false,
            ..options(false)
        },
        vec![exposure("a.fits", 45.0), exposure("b.fits", 45.0)],
    )
    .await;

    assert_eq!(summary.status, 1);
    assert_eq!(
        summary.exposures[1].units[0].failed_at,
        Some(Stage::WavelengthSolutionReady)
    );
}

#[tokio::test]
async fn failed_recompute_ignores_fresh_master_of_another_exposure() {
    let calibrator = RecordingCalibrator::new().failing(1, 1, "bias");
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        1,
        options(false),
        vec![exposure("a.fits", 45.0), exposure("b.fits", 45.0)],
    )
    .await;

    assert_eq!(summary.status, 1);
    assert!(summary.exposures[0].units[0].succeeded());
    let unit = &summary.exposures[1].units[0];
    assert_eq!(unit.failed_at, Some(Stage::BiasReady));
    assert!(unit.degraded.is_empty());
    assert!(unit.reused.is_empty());
    assert!(!diagnostics
        .events()
        .iter()
        .any(|e| matches!(e, DiagnosticEvent::StaleMaster { exposure: 1, .. })));
    assert!(sink.persisted().iter().all(|p| p.exposure == 0));
}

#[tokio::test]
async fn stale_dependency_is_warned_and_unit_completes() {
    let calibrator = RecordingCalibrator::new().failing(1, 1, "arc");
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        1,
        options(false),
        vec![exposure("a.fits", 45.0), exposure("b.fits", 45.0)],
    )
    .await;

    assert_eq!(summary.status, 0);
    let unit = &summary.exposures[1].units[0];
    assert_eq!(unit.reached, Some(Stage::Done));
    assert_eq!(unit.degraded, vec![CalibrationType::Arc]);
    assert!(unit.computed.contains(&CalibrationType::Tilt));
    assert!(calibrator.steps(1, 1).contains(&"tilts"));

    let warnings: Vec<String> = diagnostics
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DiagnosticEvent::StaleMaster {
                exposure: 1,
                kind: CalibrationType::Arc,
                reason,
                ..
            } if reason.starts_with("stale dependency of") => Some(reason),
            _ => None,
        })
        .collect();
    assert!(!warnings.is_empty());
}

#[tokio::test]
async fn exposures_are_numbered_by_position() {
    let calibrator = RecordingCalibrator::new();
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let mut first = exposure("a.fits", 45.0);
    first.index = 3;
    let mut second = exposure("b.fits", 45.0);
    second.index = 7;

    let summary = run(&calibrator, &sink, &diagnostics, 1, options(true), vec![first, second]).await;

    assert_eq!(summary.status, 0);
    let numbered: Vec<(usize, &str)> = summary
        .exposures
        .iter()
        .map(|e| (e.index, e.filename.as_str()))
        .collect();
    assert_eq!(numbered, vec![(0, "a.fits"), (1, "b.fits")]);
    assert_eq!(
        summary.exposures[1].units[0].reused.len(),
        all_types().len()
    );
}

#[tokio::test]
async fn prep_only_skips_science_stages() {
    let calibrator = RecordingCalibrator::new();
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let summary = run(
        &calibrator,
        &sink,
        &diagnostics,
        2,
        RunOptions {
            prep_only: true,
            ..options(true)
        },
        vec![exposure("a.fits", 45.0), exposure("b.fits", 45.0)],
    )
    .await;

    assert_eq!(summary.status, 0);
    assert!(summary.prep_only);
    for call in calibrator.calls() {
        assert!(
            !["standard", "science", "reduce", "flux"].contains(&call.step),
            "science step ran: {:?}",
            call
        );
    }
    for unit in summary.units() {
        assert!(unit.prep_only);
        assert_eq!(unit.reached, Some(Stage::WavelengthSolutionReady));
    }
    assert!(sink.persisted().is_empty());
}

#[tokio::test]
async fn missing_bad_pixel_mask_uses_empty_mask() {
    let calibrator = RecordingCalibrator::new().without_bpm();
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();

    let mut pipeline = Pipeline::new(&calibrator, &sink, &diagnostics, mosaic(1), options(true));
    let summary = pipeline.run(vec![exposure("a.fits", 45.0)]).await;

    assert_eq!(summary.status, 0);
    assert_eq!(calibrator.bad_pixels_seen(), vec![Some(((64, 32), 0.0))]);

    let config = summary.exposures[0].units[0].config.clone().unwrap();
    assert!(pipeline
        .cache()
        .lookup(&config, 1, CalibrationType::BadPixelMask)
        .is_none());
    assert!(pipeline
        .cache()
        .lookup(&config, 1, CalibrationType::Bias)
        .is_some());
}

#[tokio::test]
async fn exposures_are_persisted_then_closed_in_order() {
    let calibrator = RecordingCalibrator::new();
    let sink = MemorySink::default();
    let diagnostics = MemoryDiagnostics::new();
    let finished = Mutex::new(Vec::new());

    let summary = {
        let mut pipeline =
            Pipeline::new(&calibrator, &sink, &diagnostics, mosaic(2), options(true))
                .on_exposure(|report| finished.lock().unwrap().push(report.index));
        pipeline
            .run(vec![
                exposure("a.fits", 45.0),
                exposure("b.fits", 30.0),
                exposure("c.fits", 45.0),
            ])
            .await
    };

    assert_eq!(summary.status, 0);
    assert_eq!(*finished.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(diagnostics.closed(), vec![0, 1, 2]);

    let persisted = sink.persisted();
    assert_eq!(persisted.len(), 3);
    assert!(persisted.iter().all(|p| !p.released && p.spectra == 2));

    // Only the third exposure shares a setup with an earlier one
    assert!(!summary.exposures[1].units[0].computed.is_empty());
    assert!(summary.exposures[2].units[0].computed.is_empty());
}
