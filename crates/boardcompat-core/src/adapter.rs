//! Toolchain boundary.
//!
//! The core never compiles anything itself. It talks to a toolchain client
//! through [`CompileAdapter`], discovers installed libraries through
//! [`LibraryCatalog`], and asks an [`AdapterFactory`] for one independent
//! adapter per batch worker.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::BoardId;

/// Failures of the toolchain client itself (never a compiler rejection).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The requested item (core, platform, directory) is not installed.
    #[error("not found: {0}")]
    NotFound(String),

    /// The toolchain client cannot be started or reached.
    #[error("toolchain unavailable: {0}")]
    Unavailable(String),

    /// The toolchain answered with output that cannot be understood.
    #[error("unexpected toolchain output: {0}")]
    Protocol(String),
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Outcome of one compile invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub passed: bool,
    /// Combined compiler/linker output.
    pub output: String,
}

impl CompileOutput {
    pub fn pass(output: impl Into<String>) -> Self {
        Self {
            passed: true,
            output: output.into(),
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
        }
    }
}

/// A toolchain client able to compile sketches against one board.
///
/// Calls may be slow and are not assumed idempotent: two identical compiles
/// can return different transient output.
#[async_trait]
pub trait CompileAdapter: Send + Sync {
    /// Compile the sketch in `sketch_dir` with `library_dir` on the library path.
    async fn compile(
        &self,
        sketch_dir: &Path,
        library_dir: &Path,
        board: &BoardId,
    ) -> AdapterResult<CompileOutput>;

    /// Installed version of toolchain core `core` (`vendor:architecture`).
    async fn installed_core_version(&self, core: &str) -> AdapterResult<String>;
}

/// Source of installed library names (possibly `name@version`).
#[async_trait]
pub trait LibraryCatalog: Send + Sync {
    async fn installed_libraries(&self) -> AdapterResult<Vec<String>>;
}

/// Creates one exclusively-owned adapter per batch worker.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    type Adapter: CompileAdapter + 'static;

    async fn create(&self, worker_id: usize) -> AdapterResult<Self::Adapter>;
}
