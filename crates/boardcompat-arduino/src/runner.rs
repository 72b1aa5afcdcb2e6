//! Child process execution.

use std::process::Stdio;
use std::time::Instant;

use boardcompat_core::{AdapterError, AdapterResult};
use tokio::process::Command;
use tracing::debug;

use crate::command::Invocation;

/// Result of one finished child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,

    pub success: bool,
}

impl ProcessOutput {
    /// Whether the process exited with code 0.
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// stdout followed by stderr, the way a terminal user would read them.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }
}

/// Runs [`Invocation`]s as child processes.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Run an invocation to completion.
    ///
    /// A spawn failure or an expired timeout is [`AdapterError::Unavailable`];
    /// a non-zero exit is reported in the output, not as an error. The child
    /// is killed if this future is dropped before it exits.
    pub async fn run(invocation: &Invocation) -> AdapterResult<ProcessOutput> {
        let start = Instant::now();
        debug!(command = %invocation.display(), "spawning");

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AdapterError::Unavailable(format!(
                    "cannot run {}: {e}",
                    invocation.program.display()
                ))
            })?;

        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    AdapterError::Unavailable(format!(
                        "{} timed out after {} seconds",
                        invocation.name,
                        limit.as_secs()
                    ))
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| AdapterError::Unavailable(format!("{} failed: {e}", invocation.name)))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(command = %invocation.name, exit_code, duration_ms, "finished");

        Ok(ProcessOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms,
            success: output.status.success(),
        })
    }
}
