//! Structured observability hooks for library and batch lifecycle events.
//!
//! Events are emitted at `info!` level unless noted; filter with `BOARDCOMPAT_LOG`
//! or `RUST_LOG`.

use std::time::Duration;

use tracing::{debug, info, warn, Span};

/// Library-scoped span; instrument the orchestration future with it so
/// every log line carries the library.
///
/// ```ignore
/// orchestrate().instrument(library_span("Servo@1.2.1")).await;
/// ```
pub fn library_span(library: &str) -> Span {
    tracing::info_span!("boardcompat.library", library = %library)
}

pub fn emit_library_started(library: &str, boards: usize) {
    info!(event = "library.started", library = %library, boards = boards);
}

/// Emitted at `debug!` level; skips are the common case on incremental runs.
pub fn emit_board_skipped(library: &str, fqbn: &str, core_version: &str) {
    debug!(
        event = "board.skipped",
        library = %library,
        fqbn = %fqbn,
        core_version = %core_version,
        "already tested"
    );
}

pub fn emit_board_tested(library: &str, fqbn: &str, result: &str, examples: usize) {
    info!(
        event = "board.tested",
        library = %library,
        fqbn = %fqbn,
        result = %result,
        examples = examples,
    );
}

pub fn emit_library_finished(library: &str, summary: &str, new_observations: usize) {
    info!(
        event = "library.finished",
        library = %library,
        new_observations = new_observations,
        "{summary}"
    );
}

pub fn emit_library_skipped(library: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "library.skipped", library = %library, reason = %reason);
}

pub fn emit_batch_progress(worker: usize, done: usize, total: usize, eta: Duration) {
    info!(
        event = "batch.progress",
        worker = worker,
        done = done,
        total = total,
        eta_secs = eta.as_secs(),
        "done {done}/{total} libs (ETA: {}s)",
        eta.as_secs()
    );
}

pub fn emit_batch_finished(tested: usize, skipped: usize, elapsed: Duration) {
    info!(
        event = "batch.finished",
        tested = tested,
        skipped = skipped,
        elapsed_ms = elapsed.as_millis() as u64,
    );
}
