//! Run command - reduce a manifest of science exposures

use crate::cli::args::{OutputFormat, RunArgs};
use crate::config::Config;
use crate::error::{SlitredError, SlitredResult};
use crate::exposure::ExposureManifest;
use crate::reduce::{
    Diagnostics, ExposureOutcome, JsonSpectraWriter, Pipeline, QaLog, RunOptions, RunSummary,
    SyntheticCalibrator, TracingDiagnostics,
};
use crate::ui::{self, ExposureProgress, UiContext};
use console::style;
use std::path::PathBuf;
use tracing::{debug, info};

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> SlitredResult<()> {
    let ctx = UiContext::detect();
    let manifest = ExposureManifest::load(&args.manifest).await?;

    let config = apply_overrides(&args, config);
    let options = RunOptions::from_config(&config)?;
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| config.output.directory.clone());
    debug!("Writing products to {}", output_dir.display());

    let calibrator = SyntheticCalibrator::default();
    let writer = JsonSpectraWriter::new(&output_dir);
    let diagnostics: Box<dyn Diagnostics> = if config.general.qa_log && !args.no_qa {
        Box::new(QaLog::new(output_dir.join("QA")))
    } else {
        Box::new(TracingDiagnostics)
    };

    let exposures: Vec<_> = manifest
        .exposures
        .into_iter()
        .filter(|e| match e.frametype.as_deref() {
            None | Some("science") => true,
            Some(other) => {
                info!("Skipping {} ({} frame)", e.filename, other);
                false
            }
        })
        .collect();

    let progress = match args.format {
        OutputFormat::Table => ExposureProgress::new(&ctx, exposures.len(), true),
        OutputFormat::Json | OutputFormat::Plain => ExposureProgress::hidden(),
    };

    let summary = {
        let mut pipeline = Pipeline::new(
            &calibrator,
            &writer,
            diagnostics.as_ref(),
            config.mosaic.clone(),
            options,
        )
        .on_exposure(|report| progress.exposure_done(report));
        pipeline.run(exposures).await
    };
    progress.finish();

    match args.format {
        OutputFormat::Table => print_table(&ctx, &summary),
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Plain => print_plain(&summary),
    }

    if summary.is_success() {
        Ok(())
    } else {
        Err(SlitredError::User(format!(
            "{} of {} detector reductions failed",
            summary.failed_units(),
            summary.units().count()
        )))
    }
}

/// Command-line flags take precedence over the configuration files
fn apply_overrides(args: &RunArgs, config: &Config) -> Config {
    let mut config = config.clone();
    if args.reuse_master {
        config.reduce.reuse_master = true;
    }
    if args.prep_only {
        config.reduce.prep_only = true;
    }
    if args.no_stale_fallback {
        config.reduce.stale_fallback = false;
    }
    if let Some(ndet) = args.ndet {
        config.mosaic.ndet = ndet;
    }
    config
}

fn print_table(ctx: &UiContext, summary: &RunSummary) {
    ui::intro(ctx, &format!("Run {}", summary.run_id));

    println!(
        "{:<6} {:<24} {:<20} {:<10} {:<9} {}",
        style("INDEX").bold(),
        style("FILE").bold(),
        style("TARGET").bold(),
        style("OUTCOME").bold(),
        style("DETS").bold(),
        style("OUTPUT").bold()
    );
    println!("{}", "-".repeat(90));

    for exposure in &summary.exposures {
        let outcome = match exposure.outcome {
            ExposureOutcome::Completed => style("completed").green(),
            ExposureOutcome::Partial => style("partial").yellow(),
            ExposureOutcome::Failed => style("failed").red(),
        };
        let ok = exposure.units.iter().filter(|u| u.succeeded()).count();
        let output = exposure
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<6} {:<24} {:<20} {:<10} {:<9} {}",
            exposure.index,
            exposure.filename,
            exposure.target,
            outcome,
            format!("{}/{}", ok, exposure.units.len()),
            output
        );
    }

    let failures: Vec<_> = summary.units().filter(|u| !u.succeeded()).collect();
    if !failures.is_empty() {
        ui::section(ctx, "Failures");
        for unit in failures {
            let stage = unit
                .failed_at
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            ui::step_error_detail(
                ctx,
                &format!("exposure {} detector {} at {}", unit.exposure, unit.detector, stage),
                unit.error.as_deref().unwrap_or("unknown error"),
            );
        }
    }

    let degraded: Vec<_> = summary.units().filter(|u| !u.degraded.is_empty()).collect();
    if !degraded.is_empty() {
        ui::section(ctx, "Degraded calibrations");
        for unit in degraded {
            let kinds: Vec<String> = unit.degraded.iter().map(|k| k.to_string()).collect();
            ui::step_warn_hint(
                ctx,
                &format!("exposure {} detector {}", unit.exposure, unit.detector),
                &format!("stale {}", kinds.join(", ")),
            );
        }
    }

    ui::section(ctx, "Master frames");
    ui::key_value(ctx, "cached", &summary.masters.len().to_string());
    ui::key_value(
        ctx,
        "reuse",
        if summary.reuse_master { "enabled" } else { "disabled" },
    );
    if summary.prep_only {
        ui::remark(ctx, "Preparation only: science stages were skipped");
    }

    if summary.is_success() {
        ui::outro_success(
            ctx,
            &format!("{} exposure(s) reduced", summary.exposures.len()),
        );
    } else {
        ui::outro_warn(
            ctx,
            &format!("{} detector reduction(s) failed", summary.failed_units()),
        );
    }
}

fn print_json(summary: &RunSummary) -> SlitredResult<()> {
    let json = serde_json::to_string_pretty(summary)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(summary: &RunSummary) {
    for exposure in &summary.exposures {
        let output = exposure
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from("-"));
        println!(
            "{} {} {}",
            exposure.filename,
            exposure.outcome,
            output.display()
        );
    }
}
