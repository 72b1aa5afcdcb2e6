//! Plain-text rendering of an aggregate report for the terminal.

use std::fmt::Write;

use boardcompat_core::{AggregateReport, BatchSummary};

/// Per-board compatibility counts followed by the example-count distribution.
pub fn render_report(report: &AggregateReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Tested libraries: {}\n", report.num_libraries);

    for board in &report.boards {
        let _ = writeln!(out, "{} @ {}", board.fqbn, board.core_versions.join(","));
        if board.pass > 0 {
            let _ = writeln!(
                out,
                "- Compatible libs:          {} ({})",
                board.pass,
                report.percent(board.pass)
            );
            let _ = writeln!(
                out,
                "    claiming compatibility: {} ({})",
                board.pass_claim,
                report.percent(board.pass_claim)
            );
        }
        if board.fail > 0 {
            let _ = writeln!(
                out,
                "- Incompatible libs:        {} ({})",
                board.fail,
                report.percent(board.fail)
            );
            let _ = writeln!(
                out,
                "    claiming compatibility: {} ({})",
                board.fail_claim,
                report.percent(board.fail_claim)
            );
        }
        if board.untested > 0 {
            let _ = writeln!(
                out,
                "- Untested libs:            {} ({})",
                board.untested,
                report.percent(board.untested)
            );
        }
    }

    let _ = writeln!(out, "\nNumber of examples (distribution):");
    for entry in &report.examples {
        let _ = writeln!(
            out,
            "- {}: {} ({})",
            entry.examples,
            entry.libraries,
            report.percent(entry.libraries)
        );
    }
    out
}

/// Closing lines of a `testall` run.
pub fn render_batch_summary(summary: &BatchSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Tested {}/{} libraries in {}s ({} result files updated)",
        summary.tested,
        summary.total,
        summary.elapsed.as_secs(),
        summary.updated
    );
    if !summary.skipped.is_empty() {
        let _ = writeln!(out, "Skipped {}:", summary.skipped.len());
        for skipped in &summary.skipped {
            let _ = writeln!(out, "  - {}: {}", skipped.library, skipped.reason);
        }
    }
    out
}
