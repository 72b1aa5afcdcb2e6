//! Batch scheduling across a bounded worker pool.
//!
//! Library names are queued once, sorted, on a closed channel. `workers`
//! tokio tasks pull from it until it drains; each worker owns the compile
//! adapter it created and never shares it. Adapter creation is serialized
//! through a one-permit semaphore. The first fatal error raises a stop flag
//! that every worker checks before pulling the next library.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::adapter::AdapterFactory;
use crate::config::BatchConfig;
use crate::error::{CompatError, Result};
use crate::manifest::sanitize_name;
use crate::obs;
use crate::orchestrator::TestOrchestrator;
use crate::store::ResultStore;

// ---------------------------------------------------------------------------
// Library selection
// ---------------------------------------------------------------------------

/// A glob pattern over library names.
///
/// Supports `*`, `?`, `[abc]`, `[!abc]`, `[a-z]` and `{one,two}`. A
/// backslash escapes the next character. The whole name must match.
#[derive(Debug, Clone)]
pub struct LibraryFilter {
    pattern: String,
    regex: Regex,
}

impl LibraryFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let invalid = |reason: String| CompatError::InvalidFilter {
            pattern: pattern.to_string(),
            reason,
        };
        let source = glob_to_regex(pattern).map_err(invalid)?;
        let regex = Regex::new(&source).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// Compile every pattern; the first invalid one fails the whole set.
pub fn parse_filters<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<LibraryFilter>> {
    patterns.iter().map(|p| LibraryFilter::new(p.as_ref())).collect()
}

fn glob_to_regex(pattern: &str) -> std::result::Result<String, String> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut in_alternation = false;

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => return Err("trailing escape".to_string()),
            },
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut empty = true;
                for c in chars.by_ref() {
                    match c {
                        ']' if !empty => {
                            closed = true;
                            break;
                        }
                        '-' if !empty => out.push('-'),
                        other => out.push_str(&regex::escape(&other.to_string())),
                    }
                    empty = false;
                }
                if !closed {
                    return Err("unclosed character class".to_string());
                }
                out.push(']');
            }
            '{' if !in_alternation => {
                in_alternation = true;
                out.push_str("(?:");
            }
            '{' => return Err("nested alternation".to_string()),
            ',' if in_alternation => out.push('|'),
            '}' if in_alternation => {
                in_alternation = false;
                out.push(')');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    if in_alternation {
        return Err("unclosed alternation".to_string());
    }
    out.push('$');
    Ok(out)
}

/// Resolve installed library identifiers against `filters`.
///
/// A trailing `@version` is removed before matching; the result maps each
/// library name to its installed version (empty when none was given).
/// With no filters every installed library is selected.
pub fn select_libraries<S: AsRef<str>>(
    installed: &[S],
    filters: &[LibraryFilter],
) -> BTreeMap<String, String> {
    let mut selected = BTreeMap::new();
    for entry in installed {
        let entry = entry.as_ref().trim();
        let (name, version) = entry.split_once('@').unwrap_or((entry, ""));
        if name.is_empty() {
            continue;
        }
        if filters.is_empty() || filters.iter().any(|f| f.matches(name)) {
            selected.insert(name.to_string(), version.to_string());
        }
    }
    selected
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Shared completion counter and ETA clock.
#[derive(Debug)]
pub struct BatchProgress {
    total: usize,
    done: AtomicUsize,
    started: Instant,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            done: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    /// Record one finished library; returns the new completed count.
    pub fn complete(&self) -> usize {
        self.done.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn eta(&self, done: usize) -> Duration {
        estimate_remaining(self.elapsed(), done, self.total)
    }
}

/// Extrapolate `elapsed / done` over the libraries still queued.
pub fn estimate_remaining(elapsed: Duration, done: usize, total: usize) -> Duration {
    if done == 0 || done >= total {
        return Duration::ZERO;
    }
    elapsed.mul_f64((total - done) as f64 / done as f64)
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// A library that was not tested, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLibrary {
    pub library: String,
    pub reason: String,
}

/// Outcome of a batch that was not aborted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    /// Libraries whose orchestration completed.
    pub tested: usize,
    /// Libraries whose result file was rewritten.
    pub updated: usize,
    pub skipped: Vec<SkippedLibrary>,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Tally {
    tested: usize,
    updated: usize,
    skipped: Vec<SkippedLibrary>,
    fatal: Option<CompatError>,
}

struct Shared<F: AdapterFactory> {
    factory: Arc<F>,
    orchestrator: TestOrchestrator,
    store: ResultStore,
    libraries_dir: PathBuf,
    force: bool,
    queue: Mutex<mpsc::UnboundedReceiver<String>>,
    creation: Semaphore,
    stop: watch::Sender<bool>,
    progress: BatchProgress,
    tally: Mutex<Tally>,
}

impl<F: AdapterFactory> Shared<F> {
    /// Keep the first fatal error and stop every worker.
    async fn abort(&self, err: CompatError) {
        warn!(error = %err, "fatal error, stopping batch");
        let mut tally = self.tally.lock().await;
        if tally.fatal.is_none() {
            tally.fatal = Some(err);
        }
        let _ = self.stop.send(true);
    }

    /// Load, orchestrate and persist one library. Returns whether the
    /// result file was rewritten. A library without a usable manifest is an
    /// error here so the worker lists it as skipped.
    async fn test_one(&self, library: &str, adapter: &F::Adapter) -> Result<bool> {
        let prior = self.store.load(library)?;
        let path = self.libraries_dir.join(sanitize_name(library));
        let updated = self
            .orchestrator
            .try_test_library(&path, prior.clone(), self.force, adapter)
            .await?;

        if updated == prior {
            debug!(library = %library, "results unchanged, not rewriting");
            return Ok(false);
        }
        self.store.save(library, &updated)?;
        Ok(true)
    }
}

/// Runs the test orchestrator over many libraries.
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    config: BatchConfig,
}

impl BatchScheduler {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Test every library in `libraries` (already selected and de-duplicated).
    ///
    /// Returns `Err` with the first fatal error if the batch was aborted.
    #[instrument(skip_all, fields(libraries = libraries.len(), workers = self.config.workers))]
    pub async fn run<F>(&self, libraries: Vec<String>, factory: Arc<F>) -> Result<BatchSummary>
    where
        F: AdapterFactory + 'static,
    {
        let store = ResultStore::open(&self.config.data_dir)?;
        let total = libraries.len();
        if libraries.is_empty() {
            info!("no libraries selected, nothing to test");
            obs::emit_batch_finished(0, 0, Duration::ZERO);
            return Ok(BatchSummary::default());
        }
        info!(total = total, "starting batch");

        let (tx, rx) = mpsc::unbounded_channel();
        for library in libraries {
            let _ = tx.send(library);
        }
        drop(tx);

        let (stop, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            factory,
            orchestrator: TestOrchestrator::new(Arc::new(self.config.test.clone())),
            store,
            libraries_dir: self.config.libraries_dir.clone(),
            force: self.config.force,
            queue: Mutex::new(rx),
            creation: Semaphore::new(1),
            stop,
            progress: BatchProgress::new(total),
            tally: Mutex::new(Tally::default()),
        });

        let workers = self.config.workers.clamp(1, total.max(1));
        let mut tasks = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let shared = Arc::clone(&shared);
            tasks.push(tokio::spawn(run_worker(shared, worker_id)));
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "batch worker terminated abnormally");
            }
        }

        let elapsed = shared.progress.elapsed();
        let mut tally = std::mem::take(&mut *shared.tally.lock().await);
        if let Some(err) = tally.fatal.take() {
            return Err(err);
        }
        obs::emit_batch_finished(tally.tested, tally.skipped.len(), elapsed);
        tally.skipped.sort_by(|a, b| a.library.cmp(&b.library));
        Ok(BatchSummary {
            total,
            tested: tally.tested,
            updated: tally.updated,
            skipped: tally.skipped,
            elapsed,
        })
    }
}

async fn run_worker<F>(shared: Arc<Shared<F>>, worker_id: usize)
where
    F: AdapterFactory + 'static,
{
    let stop = shared.stop.subscribe();

    let adapter = {
        let _permit = shared.creation.acquire().await.ok();
        if *stop.borrow() {
            return;
        }
        debug!(worker = worker_id, "initializing compile adapter");
        match shared.factory.create(worker_id).await {
            Ok(adapter) => adapter,
            Err(e) => {
                shared.abort(CompatError::AdapterUnavailable(e)).await;
                return;
            }
        }
    };

    loop {
        if *stop.borrow() {
            break;
        }
        let next = shared.queue.lock().await.recv().await;
        let Some(library) = next else {
            break;
        };

        match shared.test_one(&library, &adapter).await {
            Ok(updated) => {
                let mut tally = shared.tally.lock().await;
                tally.tested += 1;
                tally.updated += usize::from(updated);
            }
            Err(e) if e.is_fatal() => {
                shared.abort(e).await;
                break;
            }
            Err(e) => {
                obs::emit_library_skipped(&library, &e);
                shared.tally.lock().await.skipped.push(SkippedLibrary {
                    library: library.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let done = shared.progress.complete();
        let eta = shared.progress.eta(done);
        obs::emit_batch_progress(worker_id, done, shared.progress.total(), eta);
    }
    debug!(worker = worker_id, "worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(p: &str) -> LibraryFilter {
        LibraryFilter::new(p).unwrap()
    }

    #[test]
    fn test_glob_star_and_question() {
        assert!(filter("Arduino_*").matches("Arduino_JSON"));
        assert!(!filter("Arduino_*").matches("MyArduino_JSON"));
        assert!(filter("Serv?").matches("Servo"));
        assert!(!filter("Serv?").matches("Servos"));
    }

    #[test]
    fn test_glob_classes_and_alternation() {
        assert!(filter("[A-C]*").matches("Bounce2"));
        assert!(!filter("[!A-C]*").matches("Bounce2"));
        assert!(filter("{Servo,Stepper}").matches("Stepper"));
        assert!(!filter("{Servo,Stepper}").matches("Steppers"));
    }

    #[test]
    fn test_glob_literal_metacharacters() {
        assert!(filter("Lib (v2).x").matches("Lib (v2).x"));
        assert!(!filter("Lib.x").matches("LibAx"));
        assert!(filter("a\\*b").matches("a*b"));
        assert!(!filter("a\\*b").matches("axxb"));
    }

    #[test]
    fn test_invalid_globs() {
        for bad in ["[abc", "{a,b", "x\\", "{a,{b}}"] {
            let err = LibraryFilter::new(bad).unwrap_err();
            assert!(matches!(err, CompatError::InvalidFilter { .. }), "{bad}");
        }
    }

    #[test]
    fn test_select_strips_versions_and_dedupes() {
        let installed = ["Servo@1.2.1", "Arduino_JSON@0.2.0", "Servo@1.1.0", "Stepper"];
        let all = select_libraries(&installed, &[]);
        assert_eq!(
            all.keys().collect::<Vec<_>>(),
            vec!["Arduino_JSON", "Servo", "Stepper"]
        );
        assert_eq!(all["Stepper"], "");

        let some = select_libraries(&installed, &[filter("S*")]);
        assert_eq!(some.keys().collect::<Vec<_>>(), vec!["Servo", "Stepper"]);
    }

    #[test]
    fn test_filter_does_not_see_version_suffix() {
        let selected = select_libraries(&["Servo@1.2.1"], &[filter("*1.2.1")]);
        assert!(selected.is_empty());
    }

    #[test]
    fn test_estimate_remaining() {
        let eta = estimate_remaining(Duration::from_secs(30), 3, 10);
        assert_eq!(eta.as_secs(), 70);
        assert_eq!(estimate_remaining(Duration::from_secs(30), 0, 10), Duration::ZERO);
        assert_eq!(estimate_remaining(Duration::from_secs(30), 10, 10), Duration::ZERO);
    }

    #[test]
    fn test_progress_counts_monotonically() {
        let progress = BatchProgress::new(3);
        assert_eq!(progress.complete(), 1);
        assert_eq!(progress.complete(), 2);
        assert_eq!(progress.done(), 2);
    }
}
