//! Script execution in a child process.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use super::action::ScriptLanguage;
use super::errors::ProviderError;
use super::race::{race_with_timeout, RaceError};
use crate::engine::errors::truncate_utf8;

/// Captured stream bytes kept per stream.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    working_dir: Option<std::path::PathBuf>,
}

impl ScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Run `source` under `limit`. The child is killed if the timer wins.
    pub async fn run(
        &self,
        language: ScriptLanguage,
        source: &str,
        limit: Duration,
    ) -> Result<ScriptOutput, ProviderError> {
        let (program, flag) = language.interpreter();
        let mut cmd = Command::new(program);
        cmd.arg(flag).arg(source);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ProviderError::failed(format!("failed to start {program}: {e}")))?;
        tracing::debug!(program, pid = ?child.id(), limit_ms = limit.as_millis() as u64, "script started");

        match race_with_timeout(child.wait_with_output(), limit).await {
            Ok(Ok(output)) => Ok(ScriptOutput {
                exit_code: output.status.code(),
                stdout: capture(&output.stdout),
                stderr: capture(&output.stderr),
            }),
            Ok(Err(e)) => Err(ProviderError::failed(format!("script I/O failed: {e}"))),
            Err(RaceError::TimedOut { after }) => {
                tracing::warn!(program, after_ms = after.as_millis() as u64, "script timed out, killed");
                Err(ProviderError::TimedOut {
                    after_ms: after.as_millis() as u64,
                })
            }
            Err(e) => Err(ProviderError::failed(e.to_string())),
        }
    }
}

fn capture(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    truncate_utf8(text.trim_end(), MAX_CAPTURE_BYTES).to_string()
}
