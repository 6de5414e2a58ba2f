//! Keys command - show instrument configuration keys

use crate::calib::derive_key;
use crate::cli::args::{KeysArgs, OutputFormat};
use crate::config::Config;
use crate::error::SlitredResult;
use crate::exposure::ExposureManifest;
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;
use std::collections::BTreeMap;

/// One row of the listing
#[derive(Debug, Serialize)]
struct KeyRow {
    exposure: usize,
    filename: String,
    detector: usize,
    key: String,
}

/// Execute the keys command
pub async fn execute(args: KeysArgs, config: &Config) -> SlitredResult<()> {
    let manifest = ExposureManifest::load(&args.manifest).await?;
    let mut mosaic = config.mosaic.clone();
    if let Some(ndet) = args.ndet {
        mosaic.ndet = ndet;
    }

    let mut rows = Vec::new();
    for exposure in &manifest.exposures {
        for detector in 1..=mosaic.ndet {
            let key = derive_key(exposure, &mosaic, detector)?;
            rows.push(KeyRow {
                exposure: exposure.index,
                filename: exposure.filename.clone(),
                detector,
                key: key.to_string(),
            });
        }
    }

    match args.format {
        OutputFormat::Table => print_table(&rows),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => {
            for row in &rows {
                println!("{} {} {}", row.filename, row.detector, row.key);
            }
        }
    }

    Ok(())
}

fn print_table(rows: &[KeyRow]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Instrument configurations");

    println!(
        "{:<6} {:<24} {:<5} {}",
        style("INDEX").bold(),
        style("FILE").bold(),
        style("DET").bold(),
        style("KEY").bold()
    );
    println!("{}", "-".repeat(70));

    for row in rows {
        println!(
            "{:<6} {:<24} {:<5} {}",
            row.exposure, row.filename, row.detector, row.key
        );
    }

    // Exposures sharing a (key, detector) share master frames
    let mut groups: BTreeMap<(&str, usize), Vec<&str>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.key.as_str(), row.detector))
            .or_default()
            .push(row.filename.as_str());
    }

    let shared: Vec<_> = groups.iter().filter(|(_, files)| files.len() > 1).collect();
    if !shared.is_empty() {
        ui::section(&ctx, "Shared configurations");
        for ((key, detector), files) in shared {
            ui::key_value(&ctx, &format!("{} det {}", key, detector), &files.join(", "));
        }
    }

    println!();
    println!(
        "{} distinct configuration(s) across {} detector slot(s)",
        groups.len(),
        rows.len()
    );
}
