//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Operation list
//!
//! ```text
//! Operations
//! 001 affine
//!     transform an image with a 2x2 matrix
//! 002 avg
//!     find the mean of all samples
//! ```
//!
//! ## Describe
//!
//! ```text
//! embed: embed an image in a larger image
//! Inputs
//!     in: image (required)
//!         input image
//!     extend: int
//!         0 black, 1 copy, 2 repeat, 3 mirror, 4 white, 5 background
//! Outputs
//!     out: image
//!         output image
//! ```
//!
//! ## Call history
//!
//! ```text
//! History
//! 001 jpegload(filename="in.jpg")
//! 002 rot(in=<image 8x8 rgb8>, angle=1)
//!     Failed: rot: unknown angle 7
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure.

use crate::events::CallEvent;
use crate::registry::{ArgumentSpec, Schema};
use crate::runtime::{CallCounter, HandleStats, ShutdownReport};
use crate::value::Direction;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Operations
// ============================================================================

pub fn format_operation_list(schemas: &[Arc<Schema>]) -> Vec<String> {
    let mut lines = vec!["Operations".to_string()];
    for (i, schema) in schemas.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), schema.operation));
        lines.push(format!("{}{}", indent(1), schema.description));
    }
    lines
}

pub fn print_operation_list(schemas: &[Arc<Schema>]) {
    print_lines(format_operation_list(schemas));
}

fn argument_line(arg: &ArgumentSpec) -> String {
    if arg.required && arg.direction == Direction::Input {
        format!("{}{}: {} (required)", indent(1), arg.name, arg.kind)
    } else {
        format!("{}{}: {}", indent(1), arg.name, arg.kind)
    }
}

pub fn format_schema(schema: &Schema) -> Vec<String> {
    let mut lines = vec![format!("{}: {}", schema.operation, schema.description)];
    for (title, args) in [
        ("Inputs", schema.inputs().collect::<Vec<_>>()),
        ("Outputs", schema.outputs().collect::<Vec<_>>()),
    ] {
        if args.is_empty() {
            continue;
        }
        lines.push(title.to_string());
        for arg in args {
            lines.push(argument_line(arg));
            if !arg.description.is_empty() {
                lines.push(format!("{}{}", indent(2), arg.description));
            }
        }
    }
    lines
}

pub fn print_schema(schema: &Schema) {
    print_lines(format_schema(schema));
}

/// Names accepted by interpolator arguments.
pub fn format_interpolators(names: &[&str]) -> Vec<String> {
    vec![
        "Interpolators".to_string(),
        format!("{}{}", indent(1), names.join(", ")),
    ]
}

pub fn print_interpolators(names: &[&str]) {
    print_lines(format_interpolators(names));
}

// ============================================================================
// History and statistics
// ============================================================================

pub fn format_call_history(events: &[Arc<CallEvent>]) -> Vec<String> {
    let mut lines = vec!["History".to_string()];
    for (i, event) in events.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), event));
        if let Some(failure) = event.failure() {
            lines.push(format!("{}Failed: {}", indent(1), failure));
        }
    }
    lines
}

pub fn print_call_history(events: &[Arc<CallEvent>]) {
    print_lines(format_call_history(events));
}

/// Per-operation counters, then handle counters.
///
/// ```text
/// Calls
///     jpegload: 2 calls
///     rot: 3 calls, 1 failed
/// Handles
///     images: 0 live, 4 released
///     blobs: 0 live, 1 released
/// ```
pub fn format_stats(calls: &BTreeMap<String, CallCounter>, handles: &HandleStats) -> Vec<String> {
    let mut lines = Vec::new();
    if !calls.is_empty() {
        lines.push("Calls".to_string());
        for (name, counter) in calls {
            let plural = if counter.calls == 1 { "" } else { "s" };
            let mut line = format!("{}{}: {} call{}", indent(1), name, counter.calls, plural);
            if counter.failures > 0 {
                line.push_str(&format!(", {} failed", counter.failures));
            }
            lines.push(line);
        }
    }
    lines.push("Handles".to_string());
    lines.push(format!(
        "{}images: {} live, {} released",
        indent(1),
        handles.live_images,
        handles.released_images
    ));
    lines.push(format!(
        "{}blobs: {} live, {} released",
        indent(1),
        handles.live_blobs,
        handles.released_blobs
    ));
    lines
}

pub fn print_stats(calls: &BTreeMap<String, CallCounter>, handles: &HandleStats) {
    print_lines(format_stats(calls, handles));
}

pub fn format_shutdown_report(report: &ShutdownReport) -> Vec<String> {
    if report.is_clean() {
        return vec!["Shutdown: clean".to_string()];
    }
    vec![format!(
        "Shutdown: {} image(s) and {} blob(s) still alive",
        report.leaked_images, report.leaked_blobs
    )]
}
