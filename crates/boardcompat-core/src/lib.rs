//! Boardcompat Core: library/board compatibility testing
//!
//! Decides what to compile, whether an earlier run already covered it, and
//! how the accumulated results classify. Compilation itself happens behind
//! the [`CompileAdapter`] boundary.
//!
//! ## Key Components
//!
//! - `TestOrchestrator`: tests one library against every configured board
//! - `BatchScheduler`: runs the orchestrator over many libraries with a worker pool
//! - `ResultStore`: one JSON result file per library, written atomically
//! - `aggregate`: folds result files into an `AggregateReport`

pub mod adapter;
pub mod aggregate;
pub mod config;
mod error;
pub mod fakes;
pub mod manifest;
pub mod obs;
pub mod orchestrator;
pub mod probe;
pub mod results;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod version;

pub use adapter::{
    AdapterError, AdapterFactory, AdapterResult, CompileAdapter, CompileOutput, LibraryCatalog,
};
pub use aggregate::{
    aggregate, aggregate_dir, format_percent, library_slug, library_url, AggregateReport,
    BoardStats, CompatibilityStatus, ExampleCount, LibraryReport, LIBRARY_REFERENCE_BASE,
};
pub use config::{
    parse_boards, BatchConfig, BoardId, FileConfig, TestConfig, DEFAULT_COMPILE_TIMEOUT,
};
pub use error::{CompatError, Result};
pub use manifest::{sanitize_name, LibraryManifest, MANIFEST_FILE};
pub use orchestrator::TestOrchestrator;
pub use probe::{ExampleTree, MainHeader, ProbeProject};
pub use results::{
    CompilationResult, ExampleOutcome, LibraryResultSet, ObservationKey, TestObservation,
};
pub use scheduler::{
    parse_filters, select_libraries, BatchScheduler, BatchSummary, LibraryFilter, SkippedLibrary,
};
pub use store::ResultStore;
pub use telemetry::init_tracing;
