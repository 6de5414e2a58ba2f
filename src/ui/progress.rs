//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::reduce::{ExposureOutcome, ExposureReport};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress over the exposures of a run.
///
/// Shows an indicatif bar in interactive mode and one line per finished
/// exposure otherwise. A hidden progress prints nothing.
pub struct ExposureProgress {
    bar: Option<ProgressBar>,
    visible: bool,
}

impl ExposureProgress {
    pub fn new(ctx: &UiContext, exposures: usize, visible: bool) -> Self {
        let bar = if visible && ctx.use_fancy_output() {
            let bar = ProgressBar::new(exposures as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {spinner:.cyan} Reducing  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .progress_chars("━╸─"),
            );
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self { bar, visible }
    }

    /// A progress that prints nothing
    pub fn hidden() -> Self {
        Self {
            bar: None,
            visible: false,
        }
    }

    /// Record a finished exposure
    pub fn exposure_done(&self, report: &ExposureReport) {
        if let Some(ref bar) = self.bar {
            bar.inc(1);
            bar.set_message(report.filename.clone());
            return;
        }
        if !self.visible {
            return;
        }

        let marker = match report.outcome {
            ExposureOutcome::Completed => style("[OK]").green(),
            ExposureOutcome::Partial => style("[PART]").yellow(),
            ExposureOutcome::Failed => style("[FAIL]").red(),
        };
        println!("  {} {} ({})", marker, report.filename, report.outcome);
    }

    /// Finish and clear the progress bar.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
