//! Integration tests for the batch scheduler.
//!
//! Covered:
//! - One result file per library, and nothing recompiled on a second run
//! - Per-library errors are skipped while the batch continues
//! - Libraries without a usable manifest are listed as skipped
//! - Environment errors abort the batch
//! - Compile adapters are created one at a time
//! - An empty library list creates no compile adapter

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use boardcompat_core::fakes::{FakeAdapterFactory, FakeCatalog, FakeCompileAdapter};
use boardcompat_core::{
    parse_filters, select_libraries, BatchConfig, BatchScheduler, BoardId, CompatError,
    LibraryCatalog, ResultStore, TestConfig,
};

const UNO: &str = "arduino:avr:uno";

struct Fixture {
    _tmp: tempfile::TempDir,
    libraries: PathBuf,
    data: PathBuf,
}

impl Fixture {
    fn new(names: &[&str]) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let libraries = tmp.path().join("libraries");
        let data = tmp.path().join("data");
        for name in names {
            install(&libraries, name);
        }
        Self {
            _tmp: tmp,
            libraries,
            data,
        }
    }

    fn scheduler(&self, workers: usize, force: bool) -> BatchScheduler {
        let test = TestConfig::new(vec![BoardId::parse(UNO).unwrap()])
            .with_compile_timeout(Duration::from_secs(60));
        BatchScheduler::new(
            BatchConfig::new(test, &self.data, &self.libraries)
                .with_workers(workers)
                .with_force(force),
        )
    }

    fn result_file(&self, name: &str) -> PathBuf {
        ResultStore::open(&self.data).unwrap().path_for(name)
    }
}

fn install(libraries: &Path, name: &str) {
    let dir = libraries.join(boardcompat_core::sanitize_name(name));
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(
        dir.join("library.properties"),
        format!("name={name}\nversion=1.0.0\narchitectures=avr\n"),
    )
    .unwrap();
}

fn avr() -> FakeCompileAdapter {
    FakeCompileAdapter::new().with_core("arduino:avr", "1.8.6")
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ---- Persistence and incremental runs ----

#[tokio::test]
async fn batch_writes_one_result_file_per_library() {
    let fx = Fixture::new(&["Servo", "Stepper", "Adafruit GFX Library"]);
    let factory = Arc::new(FakeAdapterFactory::new(avr()));

    let summary = fx
        .scheduler(2, false)
        .run(names(&["Adafruit GFX Library", "Servo", "Stepper"]), Arc::clone(&factory))
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.tested, 3);
    assert_eq!(summary.updated, 3);
    assert!(summary.skipped.is_empty());
    assert!(fx.data.join("Adafruit_GFX_Library.json").is_file());

    let store = ResultStore::open(&fx.data).unwrap();
    let servo = store.load("Servo").unwrap();
    assert_eq!(servo.name, "Servo");
    assert_eq!(servo.tests.len(), 1);
    assert_eq!(factory.calls().len(), 3);
}

#[tokio::test]
async fn second_run_compiles_nothing() {
    let fx = Fixture::new(&["Servo", "Stepper"]);
    let libs = names(&["Servo", "Stepper"]);

    let first = Arc::new(FakeAdapterFactory::new(avr()));
    fx.scheduler(2, false).run(libs.clone(), first).await.unwrap();
    let before = fs::read(fx.result_file("Servo")).unwrap();

    let second = Arc::new(FakeAdapterFactory::new(avr()));
    let summary = fx
        .scheduler(2, false)
        .run(libs, Arc::clone(&second))
        .await
        .unwrap();

    assert_eq!(second.calls().len(), 0);
    assert_eq!(summary.tested, 2);
    assert_eq!(summary.updated, 0);
    assert_eq!(fs::read(fx.result_file("Servo")).unwrap(), before);
}

#[tokio::test]
async fn forced_run_recompiles_without_duplicating() {
    let fx = Fixture::new(&["Servo"]);
    let libs = names(&["Servo"]);
    fx.scheduler(1, false)
        .run(libs.clone(), Arc::new(FakeAdapterFactory::new(avr())))
        .await
        .unwrap();

    let failing = Arc::new(FakeAdapterFactory::new(avr().fail_sketch("probe", UNO)));
    fx.scheduler(1, true).run(libs, Arc::clone(&failing)).await.unwrap();

    let servo = ResultStore::open(&fx.data).unwrap().load("Servo").unwrap();
    assert_eq!(failing.calls().len(), 1);
    assert_eq!(servo.tests.len(), 1);
    assert!(!servo.tests[0].passed());
}

// ---- Per-library errors ----

#[tokio::test]
async fn uninstalled_library_is_listed_as_skipped() {
    let fx = Fixture::new(&["Servo"]);
    let summary = fx
        .scheduler(1, false)
        .run(names(&["Servo", "Ghost"]), Arc::new(FakeAdapterFactory::new(avr())))
        .await
        .unwrap();

    assert_eq!(summary.tested, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].library, "Ghost");
    assert!(summary.skipped[0].reason.contains("manifest not found"));
    assert!(!fx.result_file("Ghost").exists());
}

#[tokio::test]
async fn nameless_manifest_is_listed_as_skipped() {
    let fx = Fixture::new(&["Servo"]);
    let dir = fx.libraries.join("Nameless");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("library.properties"), "version=1.0.0\n").unwrap();

    let factory = Arc::new(FakeAdapterFactory::new(avr()));
    let summary = fx
        .scheduler(1, false)
        .run(names(&["Nameless", "Servo"]), Arc::clone(&factory))
        .await
        .unwrap();

    assert_eq!(summary.tested, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].library, "Nameless");
    assert!(summary.skipped[0].reason.contains("invalid library manifest"));
    assert!(!fx.result_file("Nameless").exists());
    assert!(factory.calls().iter().all(|c| c.library_dir.ends_with("Servo")));
}

#[tokio::test]
async fn corrupt_prior_file_is_skipped_and_left_untouched() {
    let fx = Fixture::new(&["Servo", "Stepper"]);
    fs::create_dir_all(&fx.data).unwrap();
    fs::write(fx.result_file("Servo"), "{ not json").unwrap();

    let summary = fx
        .scheduler(2, false)
        .run(names(&["Servo", "Stepper"]), Arc::new(FakeAdapterFactory::new(avr())))
        .await
        .unwrap();

    assert_eq!(summary.tested, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].library, "Servo");
    assert_eq!(fs::read_to_string(fx.result_file("Servo")).unwrap(), "{ not json");
    assert!(fx.result_file("Stepper").is_file());
}

#[tokio::test]
async fn foreign_result_file_is_skipped() {
    let fx = Fixture::new(&["Servo"]);
    fs::create_dir_all(&fx.data).unwrap();
    let foreign = "{\n  \"name\": \"Other\",\n  \"tests\": []\n}\n";
    fs::write(fx.result_file("Servo"), foreign).unwrap();

    let summary = fx
        .scheduler(1, false)
        .run(names(&["Servo"]), Arc::new(FakeAdapterFactory::new(avr())))
        .await
        .unwrap();

    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.skipped[0].reason.contains("mismatch"));
    assert_eq!(fs::read_to_string(fx.result_file("Servo")).unwrap(), foreign);
}

// ---- Fatal errors ----

#[tokio::test]
async fn missing_core_aborts_batch() {
    let fx = Fixture::new(&["Servo", "Stepper"]);
    let factory = Arc::new(FakeAdapterFactory::new(FakeCompileAdapter::new()));

    let err = fx
        .scheduler(2, false)
        .run(names(&["Servo", "Stepper"]), factory)
        .await
        .unwrap_err();

    assert!(matches!(err, CompatError::CoreVersionUnavailable { .. }));
    assert!(!fx.result_file("Servo").exists());
}

#[tokio::test]
async fn unreachable_adapter_stops_single_worker_after_first_library() {
    let fx = Fixture::new(&["A", "B", "C"]);
    let factory = Arc::new(FakeAdapterFactory::new(avr().unavailable("daemon exited")));

    let err = fx
        .scheduler(1, false)
        .run(names(&["A", "B", "C"]), Arc::clone(&factory))
        .await
        .unwrap_err();

    assert!(matches!(err, CompatError::AdapterUnavailable(_)));
    assert_eq!(factory.calls().len(), 1);
}

// ---- Worker pool ----

#[tokio::test(start_paused = true)]
async fn adapter_creation_is_serialized() {
    let libs = ["A", "B", "C", "D", "E", "F"];
    let fx = Fixture::new(&libs);
    let factory = Arc::new(
        FakeAdapterFactory::new(avr()).with_creation_delay(Duration::from_millis(50)),
    );

    let summary = fx
        .scheduler(4, false)
        .run(names(&libs), Arc::clone(&factory))
        .await
        .unwrap();

    assert_eq!(summary.tested, 6);
    assert_eq!(factory.created(), 4);
    assert_eq!(factory.max_concurrent_creations(), 1);

    let mut workers: Vec<usize> = factory.calls().iter().filter_map(|c| c.worker).collect();
    workers.sort();
    workers.dedup();
    assert!(workers.iter().all(|w| *w < 4));
}

#[tokio::test]
async fn workers_are_capped_by_library_count() {
    let fx = Fixture::new(&["Servo"]);
    let factory = Arc::new(FakeAdapterFactory::new(avr()));
    fx.scheduler(8, false)
        .run(names(&["Servo"]), Arc::clone(&factory))
        .await
        .unwrap();
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn empty_library_list_starts_no_worker() {
    let fx = Fixture::new(&[]);
    let factory = Arc::new(FakeAdapterFactory::new(avr()));
    let summary = fx.scheduler(4, false).run(Vec::new(), Arc::clone(&factory)).await.unwrap();

    assert_eq!(summary.total, 0);
    assert_eq!(summary.tested, 0);
    assert!(summary.skipped.is_empty());
    assert_eq!(factory.created(), 0);
}

// ---- Catalog selection ----

#[tokio::test]
async fn catalog_selection_feeds_the_scheduler() {
    let fx = Fixture::new(&["Arduino_JSON", "Arduino_LSM6DS3", "Servo"]);
    let catalog = FakeCatalog::new([
        "Arduino_JSON@0.2.0",
        "Arduino_LSM6DS3@1.0.2",
        "Servo@1.2.1",
    ]);
    let installed = catalog.installed_libraries().await.unwrap();
    let filters = parse_filters(&["Arduino_*"]).unwrap();
    let selected: Vec<String> = select_libraries(&installed, &filters).into_keys().collect();
    assert_eq!(selected, names(&["Arduino_JSON", "Arduino_LSM6DS3"]));

    let summary = fx
        .scheduler(2, false)
        .run(selected, Arc::new(FakeAdapterFactory::new(avr())))
        .await
        .unwrap();
    assert_eq!(summary.tested, 2);
    assert!(!fx.result_file("Servo").exists());
}
