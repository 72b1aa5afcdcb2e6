//! arduino-cli invocations.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The arduino-cli subcommands boardcompat relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// arduino-cli version --format json
    Version,

    /// arduino-cli core list --format json
    CoreList,

    /// arduino-cli lib list --format json
    LibList,

    /// arduino-cli config dump --format json
    ConfigDump,

    /// arduino-cli compile --fqbn <board> --library <lib> <sketch>
    Compile {
        sketch_dir: PathBuf,
        library_dir: PathBuf,
        fqbn: String,
    },
}

impl CliCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CliCommand::Version => "version",
            CliCommand::CoreList => "core_list",
            CliCommand::LibList => "lib_list",
            CliCommand::ConfigDump => "config_dump",
            CliCommand::Compile { .. } => "compile",
        }
    }

    /// Arguments after the executable.
    pub fn args(&self) -> Vec<OsString> {
        let json = ["--format", "json"];
        let words: Vec<&str> = match self {
            CliCommand::Version => [&["version"][..], &json[..]].concat(),
            CliCommand::CoreList => [&["core", "list"][..], &json[..]].concat(),
            CliCommand::LibList => [&["lib", "list"][..], &json[..]].concat(),
            CliCommand::ConfigDump => [&["config", "dump"][..], &json[..]].concat(),
            CliCommand::Compile {
                sketch_dir,
                library_dir,
                fqbn,
            } => {
                return vec![
                    "compile".into(),
                    "--fqbn".into(),
                    fqbn.into(),
                    "--library".into(),
                    library_dir.into(),
                    sketch_dir.into(),
                ];
            }
        };
        words.into_iter().map(OsString::from).collect()
    }

    pub fn compile(sketch_dir: &Path, library_dir: &Path, fqbn: &str) -> Self {
        CliCommand::Compile {
            sketch_dir: sketch_dir.to_path_buf(),
            library_dir: library_dir.to_path_buf(),
            fqbn: fqbn.to_string(),
        }
    }
}

/// A fully resolved child process to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Human-readable name for logs.
    pub name: String,

    pub program: PathBuf,

    pub args: Vec<OsString>,

    /// Variables set on the child only.
    pub env: Vec<(String, String)>,

    /// Kill the child after this long; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, command: &CliCommand) -> Self {
        Self {
            name: command.name().to_string(),
            program: program.into(),
            args: command.args(),
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_env(mut self, env: &[(String, String)]) -> Self {
        self.env.extend_from_slice(env);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shell-like rendering for diagnostics.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}
