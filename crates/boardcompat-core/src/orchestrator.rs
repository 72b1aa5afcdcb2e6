//! Per-library test orchestration.
//!
//! For one library: read its manifest, build a probe project, then for every
//! configured board decide skip-vs-run against the prior result set, compile
//! the probe and every example, and append the new observation.
//!
//! Compiler rejections and deadline expiries are recorded as `FAIL`. Only
//! environment failures surface as errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn, Instrument};

use crate::adapter::{AdapterError, CompileAdapter, CompileOutput};
use crate::config::{BoardId, TestConfig};
use crate::error::{CompatError, Result};
use crate::manifest::LibraryManifest;
use crate::obs;
use crate::probe::{ExampleTree, MainHeader, ProbeProject};
use crate::results::{
    CompilationResult, ExampleOutcome, LibraryResultSet, ObservationKey, TestObservation,
};

/// Runs the board loop for one library at a time.
#[derive(Debug, Clone)]
pub struct TestOrchestrator {
    config: Arc<TestConfig>,
}

impl TestOrchestrator {
    pub fn new(config: Arc<TestConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Test the library at `library_path` against every configured board.
    ///
    /// Returns the updated result set; persisting it is the caller's job.
    /// A missing or invalid manifest returns `prior` unchanged. A `prior`
    /// set belonging to another library fails with
    /// [`CompatError::ResultSetMismatch`] before any board is processed.
    pub async fn test_library<A>(
        &self,
        library_path: &Path,
        prior: LibraryResultSet,
        force: bool,
        adapter: &A,
    ) -> Result<LibraryResultSet>
    where
        A: CompileAdapter + ?Sized,
    {
        let library_path = resolve_library_path(library_path);
        match LibraryManifest::read(&library_path) {
            Ok(manifest) => {
                self.test_manifest(&library_path, &manifest, prior, force, adapter).await
            }
            Err(e) if e.is_manifest_error() => {
                obs::emit_library_skipped(&library_path.display().to_string(), &e);
                Ok(prior)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`test_library`](Self::test_library), but a missing or invalid
    /// manifest is returned as an error so the caller can report the skip.
    pub async fn try_test_library<A>(
        &self,
        library_path: &Path,
        prior: LibraryResultSet,
        force: bool,
        adapter: &A,
    ) -> Result<LibraryResultSet>
    where
        A: CompileAdapter + ?Sized,
    {
        let library_path = resolve_library_path(library_path);
        let manifest = LibraryManifest::read(&library_path)?;
        self.test_manifest(&library_path, &manifest, prior, force, adapter).await
    }

    async fn test_manifest<A>(
        &self,
        library_path: &Path,
        manifest: &LibraryManifest,
        prior: LibraryResultSet,
        force: bool,
        adapter: &A,
    ) -> Result<LibraryResultSet>
    where
        A: CompileAdapter + ?Sized,
    {
        if !prior.name.is_empty() && prior.name != manifest.name {
            return Err(CompatError::ResultSetMismatch {
                known: prior.name,
                tested: manifest.name.clone(),
            });
        }

        let span = obs::library_span(&manifest.name_and_version());
        self.test_boards(library_path, manifest, prior, force, adapter)
            .instrument(span)
            .await
    }

    async fn test_boards<A>(
        &self,
        library_path: &Path,
        manifest: &LibraryManifest,
        prior: LibraryResultSet,
        force: bool,
        adapter: &A,
    ) -> Result<LibraryResultSet>
    where
        A: CompileAdapter + ?Sized,
    {
        let label = manifest.name_and_version();
        obs::emit_library_started(&label, self.config.boards.len());

        let mut results = prior;
        results.name = manifest.name.clone();
        let prior_len = results.tests.len();

        let header = MainHeader::resolve(library_path, manifest)?;
        if header.synthesized {
            info!(header = %header.file_name, "main header file not found, created an empty one");
        }

        // Removed on drop, including early returns below.
        let probe = ProbeProject::create(
            self.config.scratch_root.as_deref(),
            manifest,
            &header,
        )?;
        let examples = ExampleTree::new(library_path);

        for board in &self.config.boards {
            let core = board.core();
            let core_version = adapter.installed_core_version(core).await.map_err(|source| {
                CompatError::CoreVersionUnavailable {
                    core: core.to_string(),
                    source,
                }
            })?;

            let key = ObservationKey {
                version: &manifest.version,
                fqbn: board.as_str(),
                core_version: &core_version,
            };
            if !force && results.contains(&key) {
                obs::emit_board_skipped(&label, board.as_str(), &core_version);
                continue;
            }
            if force {
                results.purge(&key);
            }

            let probe_output = self
                .compile(adapter, probe.sketch_dir(), library_path, board)
                .await?;

            let mut example_outcomes = Vec::new();
            for example in examples.sketch_dirs() {
                let output = self.compile(adapter, &example.dir, library_path, board).await?;
                example_outcomes.push(ExampleOutcome {
                    name: example.name(),
                    result: CompilationResult::from_passed(output.passed),
                    log: output.output,
                });
            }

            let observation = TestObservation {
                version: manifest.version.clone(),
                architectures: manifest.architectures.clone(),
                fqbn: board.to_string(),
                core: core.to_string(),
                core_version,
                result: CompilationResult::from_passed(probe_output.passed),
                log: probe_output.output,
                examples: example_outcomes,
                no_main_header: header.synthesized,
            };
            obs::emit_board_tested(
                &label,
                board.as_str(),
                observation.result.as_str(),
                observation.examples.len(),
            );
            results.push(observation);
        }

        let added = results.tests.len().saturating_sub(prior_len);
        obs::emit_library_finished(&label, &results.summary_line(), added);
        Ok(results)
    }

    /// One compile under the configured deadline.
    ///
    /// Compiler failures and timeouts become a failing [`CompileOutput`]; an
    /// unreachable toolchain is an error.
    async fn compile<A>(
        &self,
        adapter: &A,
        sketch_dir: &Path,
        library_dir: &Path,
        board: &BoardId,
    ) -> Result<CompileOutput>
    where
        A: CompileAdapter + ?Sized,
    {
        let limit = self.config.compile_timeout;
        match tokio::time::timeout(limit, adapter.compile(sketch_dir, library_dir, board)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(AdapterError::Unavailable(reason))) => Err(CompatError::AdapterUnavailable(
                AdapterError::Unavailable(reason),
            )),
            Ok(Err(other)) => {
                warn!(board = %board, error = %other, "compile adapter error recorded as failure");
                Ok(CompileOutput::fail(other.to_string()))
            }
            Err(_elapsed) => {
                let timeout = CompatError::CompileTimeout {
                    board: board.to_string(),
                    limit,
                };
                warn!(sketch = %sketch_dir.display(), "{timeout}");
                Ok(CompileOutput::fail(timeout.to_string()))
            }
        }
    }
}

fn resolve_library_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeCompileAdapter;
    use std::fs;
    use std::time::Duration;

    fn library(dir: &Path, name: &str) {
        fs::write(
            dir.join("library.properties"),
            format!("name={name}\nversion=1.0.0\narchitectures=avr\n"),
        )
        .unwrap();
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("src").join(format!("{name}.h")), "").unwrap();
    }

    fn orchestrator(boards: &[&str], timeout: Duration) -> TestOrchestrator {
        let boards = boards.iter().map(|b| BoardId::parse(b).unwrap()).collect();
        TestOrchestrator::new(Arc::new(TestConfig::new(boards).with_compile_timeout(timeout)))
    }

    #[tokio::test]
    async fn test_probe_compiled_once_per_board() {
        let dir = tempfile::tempdir().unwrap();
        library(dir.path(), "Servo");
        let adapter = FakeCompileAdapter::new().with_core("arduino:avr", "1.8.6");
        let orch = orchestrator(&["arduino:avr:uno", "arduino:avr:mega"], Duration::from_secs(5));

        let set = orch
            .test_library(dir.path(), LibraryResultSet::default(), false, &adapter)
            .await
            .unwrap();

        assert_eq!(set.name, "Servo");
        assert_eq!(set.tests.len(), 2);
        assert_eq!(adapter.compile_count(), 2);
        assert!(adapter.calls().iter().all(|c| c.sketch == "probe"));
        assert_eq!(set.summary_line(), "arduino:avr:uno=PASS arduino:avr:mega=PASS");
    }

    #[tokio::test]
    async fn test_missing_manifest_keeps_prior_or_reports_skip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FakeCompileAdapter::new().with_core("arduino:avr", "1.8.6");
        let orch = orchestrator(&["arduino:avr:uno"], Duration::from_secs(5));
        let prior = LibraryResultSet::new("Servo");

        let kept = orch
            .test_library(dir.path(), prior.clone(), false, &adapter)
            .await
            .unwrap();
        assert_eq!(kept, prior);

        let err = orch
            .try_test_library(dir.path(), prior, false, &adapter)
            .await
            .unwrap_err();
        assert!(err.is_manifest_error());
        assert!(!err.is_fatal());
        assert_eq!(adapter.compile_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_core_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        library(dir.path(), "Servo");
        let adapter = FakeCompileAdapter::new();
        let orch = orchestrator(&["esp32:esp32:esp32"], Duration::from_secs(5));

        let err = orch
            .test_library(dir.path(), LibraryResultSet::default(), false, &adapter)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CompatError::CoreVersionUnavailable { ref core, .. } if core == "esp32:esp32"
        ));
        assert!(err.is_fatal());
        assert_eq!(adapter.compile_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_adapter_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        library(dir.path(), "Servo");
        let adapter = FakeCompileAdapter::new()
            .with_core("arduino:avr", "1.8.6")
            .unavailable("arduino-cli: not found");
        let orch = orchestrator(&["arduino:avr:uno"], Duration::from_secs(5));

        let err = orch
            .test_library(dir.path(), LibraryResultSet::default(), false, &adapter)
            .await
            .unwrap_err();
        assert!(matches!(err, CompatError::AdapterUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compile_deadline_recorded_as_fail() {
        let dir = tempfile::tempdir().unwrap();
        library(dir.path(), "Slow");
        let adapter = FakeCompileAdapter::new()
            .with_core("arduino:avr", "1.8.6")
            .with_compile_delay(Duration::from_secs(3600));
        let orch = orchestrator(&["arduino:avr:uno"], Duration::from_secs(30));

        let set = orch
            .test_library(dir.path(), LibraryResultSet::default(), false, &adapter)
            .await
            .unwrap();

        let obs = &set.tests[0];
        assert_eq!(obs.result, CompilationResult::Fail);
        assert_eq!(obs.log, "compilation for arduino:avr:uno timed out after 30s");
    }
}
