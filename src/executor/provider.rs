//! Capability providers — the code that actually performs an action.
//!
//! `HeadlessProvider` has no display to drive. It records UI actions in the
//! interaction history, runs scripts for real, and answers snapshots with
//! the subject and the most recent history.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::action::{ActionDescriptor, ActionKind, ActionOptions};
use super::errors::ProviderError;
use super::history::{HistoryEntry, InteractionHistory};
use super::script::ScriptRunner;
use super::subject::Subject;

/// Entries included in a snapshot.
const SNAPSHOT_HISTORY: usize = 10;

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Perform one action. Must honor cancellation by being dropped.
    async fn perform(
        &self,
        action: &ActionDescriptor,
        options: &ActionOptions,
    ) -> Result<Value, ProviderError>;

    /// Describe the current state of `subject` (or of the system).
    async fn snapshot(&self, subject: Option<&Subject>) -> Result<Value, ProviderError>;
}

pub struct HeadlessProvider {
    history: Mutex<InteractionHistory>,
    scripts: ScriptRunner,
}

impl HeadlessProvider {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history: Mutex::new(InteractionHistory::new(history_capacity)),
            scripts: ScriptRunner::new(),
        }
    }

    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .map(|h| h.recent(n))
            .unwrap_or_default()
    }

    fn record(&self, action: &ActionDescriptor, summary: String, succeeded: bool) -> u64 {
        match self.history.lock() {
            Ok(mut history) => history.record(
                &action.tool,
                summary,
                action.subject.as_ref().map(|s| s.pid),
                succeeded,
            ),
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl CapabilityProvider for HeadlessProvider {
    async fn perform(
        &self,
        action: &ActionDescriptor,
        _options: &ActionOptions,
    ) -> Result<Value, ProviderError> {
        if let ActionKind::Script {
            language,
            source,
            timeout_ms,
        } = &action.kind
        {
            if !language.available() {
                let err = ProviderError::Unsupported {
                    action: format!("{language:?} script"),
                };
                self.record(action, err.to_string(), false);
                return Err(err);
            }
            let outcome = self
                .scripts
                .run(*language, source, Duration::from_millis(*timeout_ms))
                .await;
            return match outcome {
                Ok(output) if output.succeeded() => {
                    self.record(action, format!("{language:?} script exited 0"), true);
                    Ok(json!(output))
                }
                Ok(output) => {
                    let code = output
                        .exit_code
                        .map_or_else(|| "signal".to_string(), |c| c.to_string());
                    self.record(action, format!("{language:?} script exited {code}"), false);
                    let mut reason = format!("script exited with status {code}");
                    if !output.stderr.is_empty() {
                        reason.push_str(": ");
                        reason.push_str(&output.stderr);
                    }
                    Err(ProviderError::failed(reason))
                }
                Err(e) => {
                    self.record(action, e.to_string(), false);
                    Err(e)
                }
            };
        }

        let summary = summarize(&action.kind);
        let seq = self.record(action, summary.clone(), true);
        tracing::info!(tool = %action.tool, seq, summary = %summary, "action recorded");
        Ok(json!({
            "performed": summary,
            "seq": seq,
            "action": action,
        }))
    }

    async fn snapshot(&self, subject: Option<&Subject>) -> Result<Value, ProviderError> {
        if let Some(subject) = subject {
            if subject.name.is_none() && !subject.defaulted {
                return Err(ProviderError::failed(format!(
                    "no process with pid {}",
                    subject.pid
                )));
            }
        }
        Ok(json!({
            "subject": subject,
            "recent": self.recent(SNAPSHOT_HISTORY),
            "taken_at": Utc::now(),
        }))
    }
}

fn summarize(kind: &ActionKind) -> String {
    match kind {
        ActionKind::OpenTarget { identifier, activate } => {
            format!("open {identifier}{}", if *activate { "" } else { " in background" })
        }
        ActionKind::Pointer {
            x,
            y,
            button,
            clicks,
            modifiers,
        } => {
            let mut s = format!("{button:?} click x{clicks} at ({x}, {y})").to_lowercase();
            if !modifiers.is_empty() {
                s.push_str(&format!(" with {}", modifiers.names().join("+")));
            }
            s
        }
        ActionKind::TypeText { text } => format!("type {} chars", text.chars().count()),
        ActionKind::Key { key, modifiers } => {
            let mut parts = modifiers.names();
            parts.push(key.as_str());
            format!("press {}", parts.join("+"))
        }
        ActionKind::Scroll { dx, dy } => format!("scroll by ({dx}, {dy})"),
        ActionKind::Window { operation } => format!("window {operation:?}").to_lowercase(),
        ActionKind::Script { language, .. } => format!("{language:?} script"),
    }
}
