//! Error taxonomy for orchestration, persistence and aggregation.
//!
//! Compiler rejections are not errors: they are recorded as `FAIL` data.
//! What remains is split by [`CompatError::is_fatal`] into per-library
//! problems (skip the library, keep the batch going) and environment-wide
//! problems (abort the batch).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::adapter::AdapterError;

/// Errors produced by the boardcompat core.
#[derive(Debug, Error)]
pub enum CompatError {
    /// `library.properties` is absent or unreadable.
    #[error("library manifest not found: {path}")]
    ManifestNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `library.properties` exists but does not describe a usable library.
    #[error("invalid library manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    /// The prior result set belongs to a different library.
    #[error("library name mismatch; known: {known}, tested: {tested}")]
    ResultSetMismatch { known: String, tested: String },

    /// The toolchain cannot report an installed version for a core.
    #[error("failed to get core version for {core}: {source}")]
    CoreVersionUnavailable {
        core: String,
        #[source]
        source: AdapterError,
    },

    /// The toolchain client cannot be reached at all.
    #[error("compile adapter unavailable: {0}")]
    AdapterUnavailable(#[source] AdapterError),

    /// A single compile exceeded its deadline.
    #[error("compilation for {board} timed out after {}s", limit.as_secs())]
    CompileTimeout { board: String, limit: Duration },

    /// A board identifier is not `vendor:architecture:board[:options]`.
    #[error("invalid board identifier '{0}'")]
    InvalidBoard(String),

    /// A library filter pattern could not be compiled.
    #[error("invalid library filter '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },

    /// One persisted result file could not be read or parsed.
    #[error("unreadable result file {path}: {reason}")]
    ResultFile { path: PathBuf, reason: String },

    /// The result directory cannot be created or written.
    #[error("result store unwritable at {path}: {source}")]
    ResultStoreUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scratch directory for the probe project cannot be created.
    #[error("scratch directory error: {0}")]
    Scratch(#[source] std::io::Error),

    /// Filesystem error inside one library's directory.
    #[error("library io error at {path}: {source}")]
    LibraryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CompatError {
    /// Whether this error must abort the whole batch run.
    ///
    /// Per-library errors return `false`: the scheduler logs them, skips the
    /// library and continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CompatError::ManifestNotFound { .. }
                | CompatError::ManifestInvalid { .. }
                | CompatError::ResultSetMismatch { .. }
                | CompatError::ResultFile { .. }
                | CompatError::LibraryIo { .. }
        )
    }

    /// Whether the library's manifest is missing or unusable.
    pub fn is_manifest_error(&self) -> bool {
        matches!(
            self,
            CompatError::ManifestNotFound { .. } | CompatError::ManifestInvalid { .. }
        )
    }

    pub(crate) fn library_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompatError::LibraryIo {
            path: path.into(),
            source,
        }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, CompatError>;
