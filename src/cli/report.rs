//! Plain-text pipeline reports
//!
//! Every renderer reads only step fields, so reports work the same on a live
//! pipeline and on a restored snapshot.

use crate::core::step::{FanOut, Step, Unit};
use crate::core::Pipeline;
use std::fmt::Write;

const LABEL: usize = 11;

/// Multi-line description of one step
pub fn step_details(step: &Step) -> String {
    let mut out = String::new();
    let state = match (step.done, step.failed) {
        (_, true) => "FAILED",
        (true, false) => "COMPLETE",
        (false, false) => "NOT RUN",
    };
    let (unit_label, target) = match &step.unit {
        Unit::Process { program } => ("Command:", program.as_str()),
        Unit::Function { function } => ("Function:", function.as_str()),
    };

    let _ = write!(out, "{:<LABEL$}{}", "Step:", step.name);
    let _ = write!(out, "\n{:<LABEL$}{}, Args: {}", unit_label, target, step.args);
    let _ = write!(out, "\n{:<LABEL$}{}", "State:", state);
    if let Some(fan_out) = &step.fan_out {
        let _ = write!(out, "\n{:<LABEL$}{}", "File list:", describe_fan_out(fan_out));
    }
    if !step.pretest.is_absent() {
        let _ = write!(
            out,
            "\n{:<LABEL$}{} {}",
            "Pretest:",
            step.pretest,
            gate_mark(step.failed_pretest, step.done)
        );
    }
    if !step.donetest.is_absent() {
        let _ = write!(
            out,
            "\n{:<LABEL$}{} {}",
            "Donetest:",
            step.donetest,
            gate_mark(step.failed_donetest, step.done)
        );
    }

    if let Some(result) = step.last_result.as_ref().filter(|_| step.done || step.failed) {
        if let Some(code) = result.exit_code {
            let _ = write!(out, "\n{:<LABEL$}{}", "Exit code:", code);
        }
        let _ = write!(out, "\n{:<LABEL$}{}", "Ran on:", result.start_time.to_rfc2822());
        let _ = write!(out, "\n{:<LABEL$}{}", "Runtime:", format_runtime(result.duration()));
        let _ = write!(out, "\n{:<LABEL$}{}", "Output:", flag(result.output.is_some()));
        let _ = write!(out, "\n{:<LABEL$}{}", "STDERR:", flag(result.error_output.is_some()));
    }
    if let Some(comment) = &step.comment {
        let _ = write!(out, "\n{:<LABEL$}{}", "Comment:", comment);
    }
    out
}

/// Captured stdout and stderr of the last run, empty when there is none
pub fn step_outputs(step: &Step) -> String {
    let mut out = String::new();
    if let Some(result) = &step.last_result {
        if let Some(output) = result.output.as_deref().filter(|s| !s.is_empty()) {
            let _ = write!(out, "\nOutput:\n{}", output);
        }
        if let Some(stderr) = result.error_output.as_deref().filter(|s| !s.is_empty()) {
            let _ = write!(out, "\nSTDERR:\n{}", stderr);
        }
        if let Some(error) = &result.raised_error {
            let _ = write!(out, "\nError:\n{}", error);
        }
    }
    out
}

/// Tab-delimited table with one row per step
pub fn table(pipeline: &Pipeline) -> String {
    let mut out = String::from(
        "#\tStep\tCompleted\tFailed\tPretest\tDonetest\tCommand\tArgs\tOutput\tSTDERR\tCode\n",
    );
    for (index, step) in pipeline.steps().enumerate() {
        let result = step.last_result.as_ref();
        let row = [
            index.to_string(),
            step.name.clone(),
            step.done.to_string(),
            step.failed.to_string(),
            gate_column(step.pretest.is_absent(), step.failed_pretest).to_string(),
            gate_column(step.donetest.is_absent(), step.failed_donetest).to_string(),
            step.unit.target().to_string(),
            step.args.to_string(),
            flag(result.is_some_and(|r| r.output.is_some())).to_string(),
            flag(result.is_some_and(|r| r.error_output.is_some())).to_string(),
            result
                .and_then(|r| r.exit_code)
                .map(|c| c.to_string())
                .unwrap_or_default(),
        ];
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    out
}

/// Summary table followed by the details of every step and its substeps
pub fn stats(pipeline: &Pipeline, include_outputs: bool) -> String {
    let mut out = format!("{}\n\nIndividual step stats:", pipeline);
    for step in pipeline.steps() {
        out.push_str("\n\n");
        out.push_str(&step_details(step));
        if include_outputs {
            out.push_str(&step_outputs(step));
        }
        for substep in step.substeps.iter().flatten() {
            let mut block = format!("\n{}", step_details(substep));
            if include_outputs {
                block.push_str(&step_outputs(substep));
            }
            for line in block.lines() {
                let _ = write!(out, "\n\t{}", line);
            }
        }
    }
    out
}

fn describe_fan_out(fan_out: &FanOut) -> String {
    match fan_out {
        FanOut::Pattern(pattern) => pattern.clone(),
        FanOut::Files(files) => files
            .iter()
            .map(|f| f.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn gate_mark(failed: bool, done: bool) -> &'static str {
    if failed {
        "[FAILED]"
    } else if done {
        "[DONE]"
    } else {
        ""
    }
}

fn gate_column(absent: bool, failed: bool) -> &'static str {
    match (absent, failed) {
        (true, _) => "None",
        (false, true) => "Failed",
        (false, false) => "Passed",
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn format_runtime(duration: chrono::Duration) -> String {
    let millis = duration.num_milliseconds().max(0);
    let secs = millis / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis % 1000
    )
}
