//! Tracing setup for boardcompat binaries.
//!
//! Logs always go to stderr: stdout is reserved for command output such as
//! the result-set JSON printed by `boardcompat test`.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "BOARDCOMPAT_LOG";

const CRATE_TARGETS: [&str; 3] = ["boardcompat_core", "boardcompat_arduino", "boardcompat"];

/// `level` for the boardcompat crates, `warn` for everything else.
pub fn default_filter(level: Level) -> EnvFilter {
    let mut directives = vec!["warn".to_string()];
    directives.extend(CRATE_TARGETS.iter().map(|target| format!("{target}={level}")));
    EnvFilter::new(directives.join(","))
}

/// `BOARDCOMPAT_LOG`, then `RUST_LOG`, then [`default_filter`].
pub fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| default_filter(level))
}

/// Subscriber writing text or newline-delimited JSON to `writer`.
pub fn build_subscriber<W>(
    json: bool,
    filter: EnvFilter,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        Box::new(registry.with(fmt::layer().with_target(false).json().with_writer(writer)))
    } else {
        Box::new(registry.with(fmt::layer().with_target(false).with_writer(writer)))
    }
}

/// Install the global subscriber on stderr. Later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let subscriber = build_subscriber(json, env_filter(level), std::io::stderr);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// In-memory [`MakeWriter`] for asserting on log output in tests.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut buf) = self.0.lock() {
            buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
