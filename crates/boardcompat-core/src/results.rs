//! Persisted test observations.
//!
//! The serialized field names are the on-disk result file format:
//!
//! ```json
//! { "name": "Servo", "tests": [ { "version": "1.2.1", "fqbn": "arduino:avr:uno", ... } ] }
//! ```

use serde::{Deserialize, Serialize};

use crate::config::architecture_of;
use crate::manifest::claims_architecture;

/// Outcome of one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompilationResult {
    Pass,
    Fail,
}

impl CompilationResult {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            CompilationResult::Pass
        } else {
            CompilationResult::Fail
        }
    }

    pub fn passed(self) -> bool {
        self == CompilationResult::Pass
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompilationResult::Pass => "PASS",
            CompilationResult::Fail => "FAIL",
        }
    }
}

/// Compilation of one bundled example sketch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleOutcome {
    /// Name of the example directory.
    pub name: String,
    pub result: CompilationResult,
    #[serde(default)]
    pub log: String,
}

/// One (library version, board, core version) trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestObservation {
    pub version: String,
    /// Architectures declared by the library at trial time.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub architectures: Vec<String>,
    pub fqbn: String,
    pub core: String,
    pub core_version: String,
    pub result: CompilationResult,
    #[serde(default)]
    pub log: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub examples: Vec<ExampleOutcome>,
    /// An empty main header had to be synthesized for this trial.
    #[serde(default)]
    pub no_main_header: bool,
}

/// Identity of an observation within one library's result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservationKey<'a> {
    pub version: &'a str,
    pub fqbn: &'a str,
    pub core_version: &'a str,
}

impl TestObservation {
    pub fn key(&self) -> ObservationKey<'_> {
        ObservationKey {
            version: &self.version,
            fqbn: &self.fqbn,
            core_version: &self.core_version,
        }
    }

    /// Architecture segment of the core id (`avr` for `arduino:avr`).
    pub fn core_architecture(&self) -> &str {
        architecture_of(&self.core)
    }

    /// Whether the library declared compatibility with this trial's core.
    pub fn claims(&self) -> bool {
        claims_architecture(&self.architectures, self.core_architecture())
    }

    pub fn passed(&self) -> bool {
        self.result.passed()
    }
}

/// All observations recorded for one library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryResultSet {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tests: Vec<TestObservation>,
}

impl LibraryResultSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    pub fn contains(&self, key: &ObservationKey<'_>) -> bool {
        self.tests.iter().any(|t| t.key() == *key)
    }

    /// Remove every observation with `key`; returns how many were removed.
    pub fn purge(&mut self, key: &ObservationKey<'_>) -> usize {
        let before = self.tests.len();
        self.tests.retain(|t| t.key() != *key);
        before - self.tests.len()
    }

    pub fn push(&mut self, observation: TestObservation) {
        self.tests.push(observation);
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Whether two observations share an identity key.
    pub fn has_duplicate_keys(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        !self.tests.iter().all(|t| seen.insert(t.key()))
    }

    /// `fqbn=RESULT` pairs for every observation, space separated.
    pub fn summary_line(&self) -> String {
        self.tests
            .iter()
            .map(|t| format!("{}={}", t.fqbn, t.result.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// Result files written by older tooling may carry `null` for empty lists.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
