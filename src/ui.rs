use colored::{ColoredString, Colorize};
use convergence::{ExecutionOutcome, OutcomeStatus, RunSummary, Trigger};
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
}

// ============================================================================
// Outcomes
// ============================================================================

fn badge(status: OutcomeStatus) -> ColoredString {
    let label = format!("{:<9}", status.as_str());
    match status {
        OutcomeStatus::Unchanged => label.dimmed(),
        OutcomeStatus::Converged => label.green(),
        OutcomeStatus::Failed => label.red().bold(),
        OutcomeStatus::Skipped => label.yellow(),
    }
}

/// Format a duration for display
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// One line per outcome: status, resource, then whatever explains it
pub fn outcome_line(outcome: &ExecutionOutcome) -> String {
    let mut line = format!("{} {}", badge(outcome.status), outcome.resource);
    if let Trigger::Notification { from } = &outcome.trigger {
        line.push_str(&format!(" (notified by {from})"));
    }
    if let Some(code) = outcome.exit_code.filter(|c| *c != 0) {
        line.push_str(&format!(" exit {code}"));
    }
    if outcome.duration >= Duration::from_millis(500) {
        line.push_str(&format!(" {}", format_duration(outcome.duration).dimmed()));
    }
    if let Some(error) = &outcome.error {
        line.push_str(&format!(": {}", error.red()));
    } else if let Some(detail) = &outcome.detail {
        line.push_str(&format!(": {}", detail.dimmed()));
    }
    line
}

pub fn summary_line(summary: &RunSummary) -> String {
    format!(
        "{} unchanged, {} converged, {} failed, {} skipped",
        summary.unchanged, summary.converged, summary.failed, summary.skipped
    )
}

// ============================================================================
// Tests
// ============================================================================
