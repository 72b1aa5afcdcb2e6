//! Run configuration.
//!
//! Configuration is always passed explicitly into the orchestrator and the
//! scheduler; nothing here is process-global.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CompatError, Result};

/// Default deadline for a single compile invocation.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(600);

/// A fully qualified board name: `vendor:architecture:board[:options]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BoardId(String);

impl BoardId {
    /// Parse and validate a board identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() < 3 || segments[..3].iter().any(|s| s.is_empty()) {
            return Err(CompatError::InvalidBoard(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The owning toolchain core: the first two colon-separated segments.
    pub fn core(&self) -> &str {
        match self.0.match_indices(':').nth(1) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    /// The architecture segment (`avr` in `arduino:avr:uno`).
    pub fn architecture(&self) -> &str {
        architecture_of(&self.0)
    }
}

/// Architecture segment of a raw board or core identifier, empty if absent.
pub fn architecture_of(id: &str) -> &str {
    id.split(':').nth(1).unwrap_or_default()
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BoardId {
    type Err = CompatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BoardId {
    type Error = CompatError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BoardId> for String {
    fn from(value: BoardId) -> Self {
        value.0
    }
}

/// Configuration for testing a single library.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Boards to compile against, in the order they are tested.
    pub boards: Vec<BoardId>,

    /// Deadline applied to every compile invocation.
    pub compile_timeout: Duration,

    /// Parent directory for probe-project scratch dirs (system temp if `None`).
    pub scratch_root: Option<PathBuf>,
}

impl TestConfig {
    pub fn new(boards: Vec<BoardId>) -> Self {
        Self {
            boards,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            scratch_root: None,
        }
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }
}

/// Configuration for a batch run over many libraries.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub test: TestConfig,

    /// Directory holding one result file per library.
    pub data_dir: PathBuf,

    /// Directory where libraries are installed (`<dir>/<sanitized name>`).
    pub libraries_dir: PathBuf,

    /// Number of concurrent workers.
    pub workers: usize,

    /// Re-test combinations that already have an observation.
    pub force: bool,
}

impl BatchConfig {
    pub fn new(
        test: TestConfig,
        data_dir: impl Into<PathBuf>,
        libraries_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            test,
            data_dir: data_dir.into(),
            libraries_dir: libraries_dir.into(),
            workers: 1,
            force: false,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Optional on-disk configuration (`boardcompat.toml`).
///
/// Every field is optional; command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub boards: Vec<String>,
    pub workers: Option<usize>,
    pub compile_timeout_secs: Option<u64>,
    pub datadir: Option<PathBuf>,
    pub libraries_dir: Option<PathBuf>,
    pub arduino_cli: Option<PathBuf>,
    pub cli_datadir: Option<PathBuf>,
    pub additional_urls: Vec<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CompatError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CompatError::Config(e.to_string()))
    }
}

/// Parse a list of raw board identifiers, rejecting an empty list.
pub fn parse_boards<S: AsRef<str>>(raw: &[S]) -> Result<Vec<BoardId>> {
    if raw.is_empty() {
        return Err(CompatError::Config("at least one board is required".to_string()));
    }
    raw.iter().map(|b| BoardId::parse(b.as_ref())).collect()
}
