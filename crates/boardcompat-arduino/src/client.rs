//! [`CompileAdapter`] backed by the `arduino-cli` executable.
//!
//! Every call spawns one short-lived child process. Directory overrides and
//! board manager URLs are passed through the child's environment, so several
//! configurations can coexist in one process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boardcompat_core::{
    AdapterError, AdapterFactory, AdapterResult, BoardId, CompileAdapter, CompileOutput,
    LibraryCatalog,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::command::{CliCommand, Invocation};
use crate::runner::{ProcessOutput, ProcessRunner};

pub const DEFAULT_PROGRAM: &str = "arduino-cli";

/// Deadline for listing and configuration queries. Compiles are bounded by
/// the orchestrator instead.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(120);

/// How to reach and configure arduino-cli.
#[derive(Debug, Clone)]
pub struct ArduinoCliConfig {
    pub program: PathBuf,
    /// Root for the `data`, `downloads` and `user` directories.
    pub data_dir: Option<PathBuf>,
    pub additional_urls: Vec<String>,
    pub query_timeout: Duration,
}

impl Default for ArduinoCliConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            data_dir: None,
            additional_urls: Vec::new(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl ArduinoCliConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_additional_urls<S: Into<String>>(
        mut self,
        urls: impl IntoIterator<Item = S>,
    ) -> Self {
        self.additional_urls = urls
            .into_iter()
            .map(Into::into)
            .filter(|u: &String| !u.trim().is_empty())
            .collect();
        self
    }

    /// The arduino-cli user directory implied by `data_dir`.
    pub fn user_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("user"))
    }

    /// Environment for every child process.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(dir) = &self.data_dir {
            let path = |sub: &str| dir.join(sub).to_string_lossy().into_owned();
            env.push(("ARDUINO_DIRECTORIES_DATA".to_string(), path("data")));
            env.push(("ARDUINO_DIRECTORIES_DOWNLOADS".to_string(), path("downloads")));
            env.push(("ARDUINO_DIRECTORIES_USER".to_string(), path("user")));
        }
        if !self.additional_urls.is_empty() {
            env.push((
                "ARDUINO_BOARD_MANAGER_ADDITIONAL_URLS".to_string(),
                self.additional_urls.join(","),
            ));
        }
        env
    }
}

/// One arduino-cli handle. Owned by a single worker.
#[derive(Debug, Clone)]
pub struct ArduinoCli {
    config: Arc<ArduinoCliConfig>,
    env: Vec<(String, String)>,
    worker: Option<usize>,
}

impl ArduinoCli {
    pub fn new(config: Arc<ArduinoCliConfig>) -> Self {
        let env = config.env();
        Self {
            config,
            env,
            worker: None,
        }
    }

    pub fn config(&self) -> &ArduinoCliConfig {
        &self.config
    }

    fn invocation(&self, command: &CliCommand) -> Invocation {
        Invocation::new(&self.config.program, command).with_env(&self.env)
    }

    /// Run a query command; a non-zero exit is an adapter failure.
    async fn query(&self, command: CliCommand) -> AdapterResult<String> {
        let invocation = self
            .invocation(&command)
            .with_timeout(Some(self.config.query_timeout));
        let output = ProcessRunner::run(&invocation).await?;
        if !output.passed() {
            return Err(AdapterError::Unavailable(format!(
                "`{}` exited with code {}: {}",
                invocation.display(),
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Reported arduino-cli version.
    pub async fn version(&self) -> AdapterResult<String> {
        let stdout = self.query(CliCommand::Version).await?;
        parse_version(&stdout)
    }

    /// Directory holding installed libraries (`<user dir>/libraries`).
    pub async fn libraries_dir(&self) -> AdapterResult<PathBuf> {
        let user = match self.config.user_dir() {
            Some(dir) => dir,
            None => parse_user_dir(&self.query(CliCommand::ConfigDump).await?)?,
        };
        Ok(user.join("libraries"))
    }
}

#[async_trait]
impl CompileAdapter for ArduinoCli {
    async fn compile(
        &self,
        sketch_dir: &Path,
        library_dir: &Path,
        board: &BoardId,
    ) -> AdapterResult<CompileOutput> {
        let invocation =
            self.invocation(&CliCommand::compile(sketch_dir, library_dir, board.as_str()));
        let output: ProcessOutput = ProcessRunner::run(&invocation).await?;
        debug!(
            worker = ?self.worker,
            sketch = %sketch_dir.display(),
            fqbn = %board,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "compiled"
        );
        Ok(if output.passed() {
            CompileOutput::pass(output.combined())
        } else {
            CompileOutput::fail(output.combined())
        })
    }

    async fn installed_core_version(&self, core: &str) -> AdapterResult<String> {
        let stdout = self.query(CliCommand::CoreList).await?;
        parse_core_version(&stdout, core)
    }
}

#[async_trait]
impl LibraryCatalog for ArduinoCli {
    async fn installed_libraries(&self) -> AdapterResult<Vec<String>> {
        let stdout = self.query(CliCommand::LibList).await?;
        parse_installed_libraries(&stdout)
    }
}

/// Creates one [`ArduinoCli`] per worker, checking the executable responds.
#[derive(Debug, Clone)]
pub struct ArduinoCliFactory {
    config: Arc<ArduinoCliConfig>,
}

impl ArduinoCliFactory {
    pub fn new(config: ArduinoCliConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl AdapterFactory for ArduinoCliFactory {
    type Adapter = ArduinoCli;

    async fn create(&self, worker_id: usize) -> AdapterResult<ArduinoCli> {
        let mut cli = ArduinoCli::new(Arc::clone(&self.config));
        cli.worker = Some(worker_id);
        let version = cli.version().await?;
        info!(worker = worker_id, version = %version, "initialized arduino-cli");
        Ok(cli)
    }
}

// ---------------------------------------------------------------------------
// JSON output parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Platform {
    id: String,
    #[serde(default, alias = "installed")]
    installed_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CoreListing {
    Legacy(Vec<Platform>),
    Wrapped {
        #[serde(default)]
        platforms: Vec<Platform>,
    },
}

#[derive(Debug, Deserialize)]
struct LibraryInfo {
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct InstalledLibrary {
    library: LibraryInfo,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LibraryListing {
    Legacy(Vec<InstalledLibrary>),
    Wrapped {
        #[serde(default)]
        installed_libraries: Vec<InstalledLibrary>,
    },
}

fn protocol(what: &str, e: serde_json::Error) -> AdapterError {
    AdapterError::Protocol(format!("{what}: {e}"))
}

/// Installed version of `core` from `core list --format json`.
pub fn parse_core_version(json: &str, core: &str) -> AdapterResult<String> {
    let platforms = match serde_json::from_str(json).map_err(|e| protocol("core list", e))? {
        CoreListing::Legacy(platforms) => platforms,
        CoreListing::Wrapped { platforms } => platforms,
    };
    platforms
        .into_iter()
        .find(|p| p.id == core && !p.installed_version.is_empty())
        .map(|p| p.installed_version)
        .ok_or_else(|| AdapterError::NotFound(format!("platform {core}")))
}

/// `name@version` for every entry of `lib list --format json`.
pub fn parse_installed_libraries(json: &str) -> AdapterResult<Vec<String>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let libraries = match serde_json::from_str(json).map_err(|e| protocol("lib list", e))? {
        LibraryListing::Legacy(libraries) => libraries,
        LibraryListing::Wrapped {
            installed_libraries,
        } => installed_libraries,
    };
    Ok(libraries
        .into_iter()
        .map(|l| match l.library.version.as_str() {
            "" => l.library.name,
            version => format!("{}@{version}", l.library.name),
        })
        .collect())
}

/// `directories.user` from `config dump --format json`.
pub fn parse_user_dir(json: &str) -> AdapterResult<PathBuf> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| protocol("config dump", e))?;
    let root = value.get("config").unwrap_or(&value);
    root.pointer("/directories/user")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| AdapterError::Protocol("config dump: no directories.user".to_string()))
}

/// `VersionString` from `version --format json`.
pub fn parse_version(json: &str) -> AdapterResult<String> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| protocol("version", e))?;
    value
        .get("VersionString")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AdapterError::Protocol("version: no VersionString".to_string()))
}
