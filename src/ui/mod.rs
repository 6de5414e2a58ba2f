//! Terminal output helpers
//!
//! Fancy output (symbols, progress bars) is used in interactive terminals,
//! with automatic fallback to plain tagged lines in CI/non-interactive
//! environments.
//!
//! # Example
//!
//! ```rust,ignore
//! use slitred::ui::{self, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "Reduction summary");
//! ui::step_ok(&ctx, "b0042.fits completed");
//! ui::outro_success(&ctx, "All exposures reduced");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, outro_warn, remark, section, step_error_detail, step_ok,
    step_ok_detail, step_warn_hint,
};
pub use progress::ExposureProgress;
