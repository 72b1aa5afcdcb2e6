//! Deterministic in-memory toolchain fakes (testing only)
//!
//! `FakeCompileAdapter`, `FakeCatalog` and `FakeAdapterFactory` satisfy the
//! boundary traits without spawning any process, and record every call.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::{
    AdapterError, AdapterFactory, AdapterResult, CompileAdapter, CompileOutput, LibraryCatalog,
};
use crate::config::BoardId;

// ---------------------------------------------------------------------------
// FakeCompileAdapter
// ---------------------------------------------------------------------------

/// One recorded `compile` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCall {
    /// File name of the sketch directory (`probe` for the probe project).
    pub sketch: String,
    pub sketch_dir: PathBuf,
    pub library_dir: PathBuf,
    pub board: String,
    pub worker: Option<usize>,
}

/// Scriptable compile adapter.
///
/// Every compile passes unless `(sketch name, board)` was registered with
/// [`FakeCompileAdapter::fail_sketch`]. Clones share the call log.
#[derive(Debug, Clone, Default)]
pub struct FakeCompileAdapter {
    core_versions: HashMap<String, String>,
    failures: HashSet<(String, String)>,
    compile_delay: Option<Duration>,
    unavailable: Option<String>,
    worker: Option<usize>,
    calls: Arc<Mutex<Vec<CompileCall>>>,
}

impl FakeCompileAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `version` as the installed version of `core`.
    pub fn with_core(mut self, core: &str, version: &str) -> Self {
        self.core_versions.insert(core.to_string(), version.to_string());
        self
    }

    /// Make compiles of sketch directory `sketch` for `board` fail.
    pub fn fail_sketch(mut self, sketch: &str, board: &str) -> Self {
        self.failures.insert((sketch.to_string(), board.to_string()));
        self
    }

    /// Sleep this long inside every compile.
    pub fn with_compile_delay(mut self, delay: Duration) -> Self {
        self.compile_delay = Some(delay);
        self
    }

    /// Fail every compile with [`AdapterError::Unavailable`].
    pub fn unavailable(mut self, reason: &str) -> Self {
        self.unavailable = Some(reason.to_string());
        self
    }

    pub fn calls(&self) -> Vec<CompileCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn compile_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn for_worker(&self, worker: usize) -> Self {
        let mut adapter = self.clone();
        adapter.worker = Some(worker);
        adapter
    }
}

#[async_trait]
impl CompileAdapter for FakeCompileAdapter {
    async fn compile(
        &self,
        sketch_dir: &Path,
        library_dir: &Path,
        board: &BoardId,
    ) -> AdapterResult<CompileOutput> {
        let sketch = sketch_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(CompileCall {
            sketch: sketch.clone(),
            sketch_dir: sketch_dir.to_path_buf(),
            library_dir: library_dir.to_path_buf(),
            board: board.to_string(),
            worker: self.worker,
        });

        if let Some(reason) = &self.unavailable {
            return Err(AdapterError::Unavailable(reason.clone()));
        }
        if let Some(delay) = self.compile_delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures.contains(&(sketch.clone(), board.to_string())) {
            Ok(CompileOutput::fail(format!("{sketch}: compilation failed for {board}")))
        } else {
            Ok(CompileOutput::pass(format!("{sketch}: ok for {board}")))
        }
    }

    async fn installed_core_version(&self, core: &str) -> AdapterResult<String> {
        self.core_versions
            .get(core)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(core.to_string()))
    }
}

// ---------------------------------------------------------------------------
// FakeCatalog
// ---------------------------------------------------------------------------

/// Fixed list of installed libraries.
#[derive(Debug, Clone, Default)]
pub struct FakeCatalog {
    libraries: Vec<String>,
}

impl FakeCatalog {
    pub fn new<S: Into<String>>(libraries: impl IntoIterator<Item = S>) -> Self {
        Self {
            libraries: libraries.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl LibraryCatalog for FakeCatalog {
    async fn installed_libraries(&self) -> AdapterResult<Vec<String>> {
        Ok(self.libraries.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeAdapterFactory
// ---------------------------------------------------------------------------

/// Hands every worker its own clone of a template adapter.
///
/// Tracks how many adapters were created and the highest number of
/// creations that overlapped in time.
#[derive(Debug, Default)]
pub struct FakeAdapterFactory {
    template: FakeCompileAdapter,
    creation_delay: Option<Duration>,
    created: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeAdapterFactory {
    pub fn new(template: FakeCompileAdapter) -> Self {
        Self {
            template,
            ..Self::default()
        }
    }

    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = Some(delay);
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_creations(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Call log shared by every adapter this factory created.
    pub fn calls(&self) -> Vec<CompileCall> {
        self.template.calls()
    }
}

#[async_trait]
impl AdapterFactory for FakeAdapterFactory {
    type Adapter = FakeCompileAdapter;

    async fn create(&self, worker_id: usize) -> AdapterResult<Self::Adapter> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.creation_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.template.for_worker(worker_id))
    }
}
