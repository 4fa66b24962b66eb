//! CLI output formatting

use crate::core::{Step, StepStatus};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a step status for display
pub fn format_status(status: StepStatus) -> String {
    match status {
        StepStatus::NotRun => style("NOT RUN").dim().to_string(),
        StepStatus::Done => style("DONE").green().to_string(),
        StepStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// One line per step: icon, name, status and substep counts for fan-outs
pub fn format_step_line(step: &Step) -> String {
    let icon = match step.status() {
        StepStatus::Done => CHECK,
        StepStatus::Failed => CROSS,
        StepStatus::NotRun => INFO,
    };
    let mut line = format!(
        "{}{} {}",
        icon,
        style(&step.name).bold(),
        format_status(step.status())
    );
    if let Some(substeps) = &step.substeps {
        let done = substeps.iter().filter(|s| s.done).count();
        let failed = substeps.iter().filter(|s| s.failed).count();
        line.push_str(&format!(
            " ({}/{} done, {} failed)",
            style(done).green(),
            substeps.len(),
            style(failed).red()
        ));
    }
    line
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Tail of what a failed step left behind: stderr, else the raised error,
/// else stdout. Substeps are searched when the step itself has nothing.
pub fn failure_excerpt(step: &Step, max_lines: usize) -> Option<String> {
    let own = step.last_result.as_ref().filter(|_| step.failed).and_then(|result| {
        [&result.error_output, &result.raised_error, &result.output]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
            .map(|text| format_output(text, max_lines))
    });
    own.or_else(|| {
        step.substeps
            .iter()
            .flatten()
            .filter(|s| s.failed)
            .find_map(|s| failure_excerpt(s, max_lines).map(|text| format!("{}:\n{}", s.name, text)))
    })
}
