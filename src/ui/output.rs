//! Output functions for consistent CLI formatting

use super::context::UiContext;
use console::style;

/// Display a title banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        println!("{} {}", style("┌").dim(), style(title).cyan().bold());
    } else {
        println!("{}", style(title).cyan().bold());
    }
    println!();
}

/// Display success outro
pub fn outro_success(ctx: &UiContext, message: &str) {
    println!();
    if ctx.use_fancy_output() {
        println!("{} {}", style("└").dim(), style(message).green().bold());
    } else {
        println!("{} {}", style("[OK]").green(), message);
    }
}

/// Display warning outro
pub fn outro_warn(ctx: &UiContext, message: &str) {
    println!();
    if ctx.use_fancy_output() {
        println!("{} {}", style("└").dim(), style(message).yellow().bold());
    } else {
        println!("{} {}", style("[WARN]").yellow(), message);
    }
}

/// Display a section header
pub fn section(_ctx: &UiContext, title: &str) {
    println!();
    println!("{}", style(title).bold());
}

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}", style("✓").green(), message);
    } else {
        println!("  {} {}", style("[OK]").green(), message);
    }
}

/// Display a success step with detail
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {} ({})", style("✓").green(), message, style(detail).dim());
    } else {
        println!("  {} {} ({})", style("[OK]").green(), message, detail);
    }
}

/// Display a warning step with hint
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {} - {}", style("!").yellow(), message, style(hint).dim());
    } else {
        println!("  {} {} - {}", style("[WARN]").yellow(), message, hint);
    }
}

/// Display an error step with detail
pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}: {}", style("✗").red(), message, style(detail).red());
    } else {
        println!("  {} {}: {}", style("[FAIL]").red(), message, detail);
    }
}

/// Display a remark/hint
pub fn remark(_ctx: &UiContext, message: &str) {
    println!("  {}", style(message).dim());
}

/// Print styled key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}
