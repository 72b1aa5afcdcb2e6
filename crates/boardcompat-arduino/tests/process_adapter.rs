//! Integration tests for the arduino-cli process adapter.
//!
//! Drives a scripted stand-in for `arduino-cli` so the real toolchain is not
//! needed. Covered:
//! - Factory start-up check and per-worker adapters
//! - Core and library listings parsed from JSON output
//! - Compile exit status mapped to PASS/FAIL with the combined log
//! - Directory overrides reaching the child through its environment
//! - A full orchestrator run through the adapter

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use boardcompat_arduino::{ArduinoCli, ArduinoCliConfig, ArduinoCliFactory};
use boardcompat_core::{
    AdapterError, AdapterFactory, BoardId, CompilationResult, CompileAdapter, LibraryCatalog,
    LibraryResultSet, TestConfig, TestOrchestrator,
};

const FAKE_CLI: &str = r#"#!/bin/sh
case "$1" in
  version)
    echo '{"Application":"arduino-cli","VersionString":"0.35.3"}'
    ;;
  core)
    echo '{"platforms":[{"id":"arduino:avr","installed_version":"1.8.6"}]}'
    ;;
  lib)
    echo '{"installed_libraries":[{"library":{"name":"Servo","version":"1.2.1"}},{"library":{"name":"Stepper","version":"1.1.3"}}]}'
    ;;
  config)
    echo '{"directories":{"data":"/opt/arduino-data","user":"/opt/arduino-user"}}'
    ;;
  compile)
    for last; do :; done
    echo "fqbn=$3 user=$ARDUINO_DIRECTORIES_USER"
    case "$last" in
      *Broken*) echo "error: expected ';' before '}' token" >&2; exit 1 ;;
    esac
    ;;
  *)
    echo "unknown command $1" >&2
    exit 2
    ;;
esac
"#;

fn install_fake_cli(dir: &Path) -> PathBuf {
    let path = dir.join("arduino-cli");
    fs::write(&path, FAKE_CLI).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn write_library(root: &Path) -> PathBuf {
    let dir = root.join("Servo");
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(
        dir.join("library.properties"),
        "name=Servo\nversion=1.2.1\narchitectures=avr,megaavr\n",
    )
    .unwrap();
    fs::write(dir.join("src/Servo.h"), "").unwrap();
    for example in ["Sweep", "Broken"] {
        let ex = dir.join("examples").join(example);
        fs::create_dir_all(&ex).unwrap();
        fs::write(ex.join(format!("{example}.ino")), "void setup() {}\nvoid loop() {}\n").unwrap();
    }
    dir
}

// One test: the script is written once and then only executed, which keeps
// parallel test threads from spawning a file another thread is writing.
#[tokio::test]
async fn scripted_cli_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let program = install_fake_cli(tmp.path());
    let data_dir = tmp.path().join("cli-data");

    // ---- Factory ----

    let config = ArduinoCliConfig::new(&program)
        .with_data_dir(&data_dir)
        .with_additional_urls(["https://example.com/package_index.json"]);
    let factory = ArduinoCliFactory::new(config.clone());
    let cli = factory.create(0).await.unwrap();
    assert_eq!(cli.version().await.unwrap(), "0.35.3");

    // ---- Listings ----

    assert_eq!(cli.installed_core_version("arduino:avr").await.unwrap(), "1.8.6");
    let missing = cli.installed_core_version("esp32:esp32").await.unwrap_err();
    assert!(matches!(missing, AdapterError::NotFound(_)));

    assert_eq!(
        cli.installed_libraries().await.unwrap(),
        vec!["Servo@1.2.1", "Stepper@1.1.3"]
    );

    // ---- Library directory ----

    assert_eq!(
        cli.libraries_dir().await.unwrap(),
        data_dir.join("user").join("libraries")
    );
    let default_dirs = ArduinoCli::new(Arc::new(ArduinoCliConfig::new(&program)));
    assert_eq!(
        default_dirs.libraries_dir().await.unwrap(),
        PathBuf::from("/opt/arduino-user/libraries")
    );

    // ---- Compile ----

    let library = write_library(tmp.path());
    let uno = BoardId::parse("arduino:avr:uno").unwrap();

    let pass = cli
        .compile(&library.join("examples/Sweep"), &library, &uno)
        .await
        .unwrap();
    assert!(pass.passed);
    let expected_user = data_dir.join("user");
    assert!(pass.output.contains("fqbn=arduino:avr:uno"));
    assert!(pass
        .output
        .contains(&format!("user={}", expected_user.display())));

    let fail = cli
        .compile(&library.join("examples/Broken"), &library, &uno)
        .await
        .unwrap();
    assert!(!fail.passed);
    assert!(fail.output.contains("expected ';'"));

    // ---- Orchestrator through the adapter ----

    let orchestrator = TestOrchestrator::new(Arc::new(
        TestConfig::new(vec![uno])
            .with_scratch_root(tmp.path().join("scratch"))
            .with_compile_timeout(Duration::from_secs(60)),
    ));
    let results = orchestrator
        .test_library(&library, LibraryResultSet::default(), false, &cli)
        .await
        .unwrap();

    assert_eq!(results.name, "Servo");
    assert_eq!(results.tests.len(), 1);
    let observation = &results.tests[0];
    assert_eq!(observation.core_version, "1.8.6");
    assert_eq!(observation.result, CompilationResult::Pass);
    assert_eq!(observation.architectures, vec!["avr", "megaavr"]);
    let examples: Vec<(&str, CompilationResult)> = observation
        .examples
        .iter()
        .map(|e| (e.name.as_str(), e.result))
        .collect();
    assert_eq!(
        examples,
        vec![("Broken", CompilationResult::Fail), ("Sweep", CompilationResult::Pass)]
    );

    // ---- Missing executable ----

    let absent = ArduinoCliFactory::new(ArduinoCliConfig::new(tmp.path().join("no-such-cli")));
    let err = absent.create(1).await.unwrap_err();
    assert!(matches!(err, AdapterError::Unavailable(_)));
}
