//! Boardcompat - library/board compatibility CLI
//!
//! The `boardcompat` command compiles installed embedded libraries against a
//! list of boards and summarizes the accumulated results.
//!
//! ## Commands
//!
//! - `test`: Test one library directory and print or store its results
//! - `testall`: Test every installed library matching the filters
//! - `report`: Aggregate the result directory into a compatibility report

mod console;

use anyhow::{bail, Context, Result};
use boardcompat_arduino::{ArduinoCli, ArduinoCliConfig, ArduinoCliFactory};
use boardcompat_core::store::{read_result_file, write_result_file};
use boardcompat_core::{
    aggregate_dir, parse_boards, parse_filters, select_libraries, AdapterFactory,
    AggregateReport, BatchConfig, BatchScheduler, BoardId, CompileAdapter, FileConfig,
    LibraryCatalog, LibraryResultSet, TestConfig, TestOrchestrator, DEFAULT_COMPILE_TIMEOUT,
};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "boardcompat")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Library/board compatibility tester", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Toolchain and configuration flags shared by every subcommand.
#[derive(Args, Debug, Default)]
struct GlobalOpts {
    /// TOML configuration file
    #[arg(long, global = true, env = "BOARDCOMPAT_CONFIG")]
    config: Option<PathBuf>,

    /// arduino-cli executable
    #[arg(long, global = true, env = "BOARDCOMPAT_ARDUINO_CLI")]
    arduino_cli: Option<PathBuf>,

    /// Private arduino-cli data directory (data/, downloads/, user/)
    #[arg(long, global = true, env = "BOARDCOMPAT_CLI_DATADIR")]
    cli_datadir: Option<PathBuf>,

    /// Additional board manager URLs (comma-separated)
    #[arg(long, global = true, value_delimiter = ',', env = "BOARDCOMPAT_ADDITIONAL_URLS")]
    additional_urls: Vec<String>,

    /// Directory holding installed libraries (default: from arduino-cli)
    #[arg(long, global = true, env = "BOARDCOMPAT_LIBRARIES_DIR")]
    libraries_dir: Option<PathBuf>,

    /// Per-compile deadline in seconds
    #[arg(long, global = true, env = "BOARDCOMPAT_COMPILE_TIMEOUT")]
    compile_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Test a single library directory
    Test {
        /// Path to the library (directory containing library.properties)
        library: PathBuf,

        /// Boards to test (repeatable or comma-separated)
        #[arg(long, value_delimiter = ',')]
        fqbn: Vec<String>,

        /// Result file to extend (printed to stdout if omitted)
        #[arg(long)]
        results: Option<PathBuf>,

        /// Re-test combinations that already have a result
        #[arg(long)]
        force: bool,
    },

    /// Test all installed libraries matching the filters
    Testall {
        /// Result directory (one JSON file per library)
        #[arg(long, env = "BOARDCOMPAT_DATADIR")]
        datadir: Option<PathBuf>,

        /// Boards to test (repeatable or comma-separated)
        #[arg(long, value_delimiter = ',')]
        fqbn: Vec<String>,

        /// Number of parallel workers
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Re-test combinations that already have a result
        #[arg(long)]
        force: bool,

        /// Glob patterns on library names (default: all installed)
        filters: Vec<String>,
    },

    /// Aggregate results into a compatibility report
    Report {
        /// Result directory (one JSON file per library)
        #[arg(long, env = "BOARDCOMPAT_DATADIR")]
        datadir: Option<PathBuf>,

        /// Directory to write report.json into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Effective settings: command-line flags over the optional config file.
#[derive(Debug, Clone)]
struct Settings {
    file: FileConfig,
    toolchain: ArduinoCliConfig,
    libraries_dir: Option<PathBuf>,
    compile_timeout: Duration,
}

impl Settings {
    fn resolve(opts: &GlobalOpts) -> Result<Self> {
        let file = match &opts.config {
            Some(path) => FileConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => FileConfig::default(),
        };

        let mut toolchain = ArduinoCliConfig::default();
        if let Some(program) = opts.arduino_cli.clone().or_else(|| file.arduino_cli.clone()) {
            toolchain.program = program;
        }
        toolchain.data_dir = opts.cli_datadir.clone().or_else(|| file.cli_datadir.clone());
        let urls = if opts.additional_urls.is_empty() {
            file.additional_urls.clone()
        } else {
            opts.additional_urls.clone()
        };
        let toolchain = toolchain.with_additional_urls(urls);

        let compile_timeout = opts
            .compile_timeout
            .or(file.compile_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COMPILE_TIMEOUT);
        if compile_timeout.is_zero() {
            bail!("--compile-timeout must be greater than zero");
        }

        Ok(Self {
            libraries_dir: opts.libraries_dir.clone().or_else(|| file.libraries_dir.clone()),
            file,
            toolchain,
            compile_timeout,
        })
    }

    fn boards(&self, flags: &[String]) -> Result<Vec<BoardId>> {
        let raw = if flags.is_empty() {
            self.file.boards.as_slice()
        } else {
            flags
        };
        parse_boards(raw).context("Invalid board list (use --fqbn or `boards` in the config file)")
    }

    fn test_config(&self, boards: Vec<BoardId>) -> TestConfig {
        TestConfig::new(boards).with_compile_timeout(self.compile_timeout)
    }

    fn datadir(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        match flag.or_else(|| self.file.datadir.clone()) {
            Some(dir) => Ok(dir),
            None => {
                bail!("No result directory given (use --datadir or `datadir` in the config file)")
            }
        }
    }

    fn workers(&self, flag: Option<usize>) -> usize {
        flag.or(self.file.workers).unwrap_or(1).max(1)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    boardcompat_core::init_tracing(cli.json, level);

    let settings = Settings::resolve(&cli.global)?;

    match cli.command {
        Commands::Test {
            library,
            fqbn,
            results,
            force,
        } => cmd_test(&settings, &library, &fqbn, results.as_deref(), force).await,
        Commands::Testall {
            datadir,
            fqbn,
            jobs,
            force,
            filters,
        } => cmd_testall(&settings, datadir, &fqbn, jobs, force, &filters).await,
        Commands::Report { datadir, output } => {
            cmd_report(&settings.datadir(datadir)?, output.as_deref())
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_test(
    settings: &Settings,
    library: &Path,
    fqbn: &[String],
    results: Option<&Path>,
    force: bool,
) -> Result<()> {
    let adapter = ArduinoCliFactory::new(settings.toolchain.clone())
        .create(0)
        .await
        .context("Failed to start arduino-cli")?;
    let request = TestRequest {
        library,
        fqbn,
        results,
        force,
    };
    run_test(settings, &request, &adapter, &mut std::io::stdout()).await
}

/// Arguments of `boardcompat test`.
struct TestRequest<'a> {
    library: &'a Path,
    fqbn: &'a [String],
    results: Option<&'a Path>,
    force: bool,
}

/// Test one library and write command output to `out`.
///
/// Without a results file the updated result set is the only thing written,
/// so `out` stays parseable as JSON.
async fn run_test<A: CompileAdapter>(
    settings: &Settings,
    request: &TestRequest<'_>,
    adapter: &A,
    out: &mut impl Write,
) -> Result<()> {
    let boards = settings.boards(request.fqbn)?;
    let orchestrator = TestOrchestrator::new(Arc::new(settings.test_config(boards)));

    let prior = match request.results {
        Some(path) if path.exists() => read_result_file(path)
            .with_context(|| format!("Failed to read results {}", path.display()))?,
        _ => LibraryResultSet::default(),
    };

    let updated = orchestrator
        .test_library(request.library, prior.clone(), request.force, adapter)
        .await
        .with_context(|| format!("Failed to test {}", request.library.display()))?;

    match request.results {
        Some(path) => {
            if updated != prior {
                write_result_file(path, &updated)
                    .with_context(|| format!("Failed to write results {}", path.display()))?;
            }
            writeln!(out, "{}", updated.summary_line())?;
            writeln!(out, "Results written to {}", path.display())?;
        }
        None => writeln!(out, "{}", serde_json::to_string_pretty(&updated)?)?,
    }
    Ok(())
}

async fn cmd_testall(
    settings: &Settings,
    datadir: Option<PathBuf>,
    fqbn: &[String],
    jobs: Option<usize>,
    force: bool,
    filters: &[String],
) -> Result<()> {
    let datadir = settings.datadir(datadir)?;
    let boards = settings.boards(fqbn)?;
    let filters = parse_filters(filters).context("Invalid library filter")?;

    let catalog = ArduinoCli::new(Arc::new(settings.toolchain.clone()));
    let installed = catalog
        .installed_libraries()
        .await
        .context("Failed to list installed libraries")?;
    let selected = select_libraries(&installed, &filters);
    println!("Total libraries: {}", selected.len());

    let libraries_dir = match &settings.libraries_dir {
        Some(dir) => dir.clone(),
        None => catalog
            .libraries_dir()
            .await
            .context("Failed to locate the libraries directory")?,
    };
    info!(libraries_dir = %libraries_dir.display(), "resolved libraries directory");

    let config = BatchConfig::new(settings.test_config(boards), &datadir, libraries_dir)
        .with_workers(settings.workers(jobs))
        .with_force(force);
    let factory = Arc::new(ArduinoCliFactory::new(settings.toolchain.clone()));

    let summary = BatchScheduler::new(config)
        .run(selected.into_keys().collect(), factory)
        .await
        .context("Batch aborted")?;

    print!("{}", console::render_batch_summary(&summary));
    Ok(())
}

/// Report data handed to renderers.
#[derive(Debug, Serialize)]
struct ReportDocument<'a> {
    generated_at: DateTime<Utc>,
    report: &'a AggregateReport,
}

fn cmd_report(datadir: &Path, output: Option<&Path>) -> Result<()> {
    let report = aggregate_dir(datadir)
        .with_context(|| format!("Failed to aggregate results in {}", datadir.display()))?;

    print!("{}", console::render_report(&report));

    if let Some(dir) = output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join("report.json");
        let document = ReportDocument {
            generated_at: Utc::now(),
            report: &report,
        };
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(&path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\nReport written to {}", path.display());
    }
    Ok(())
}
