//! Executor settings, filled from the `serve` command line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Name reported in the initialize handshake.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Script time limit when the call does not set one.
    #[serde(default = "default_script_timeout_ms")]
    pub default_script_timeout_ms: u64,
    /// Upper bound a call may request for a script.
    #[serde(default = "default_max_script_timeout_ms")]
    pub max_script_timeout_ms: u64,
    /// Entries kept in the interaction history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Fixed default subject. `None` means the parent process.
    #[serde(default)]
    pub foreground_pid: Option<u32>,
    /// Cap on a call's `feedback_duration_ms` and `step_delay_ms`.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jobs that may wait for the execution lane.
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,
}

fn default_server_name() -> String {
    "actionbridge".to_string()
}
fn default_script_timeout_ms() -> u64 {
    30_000
}
fn default_max_script_timeout_ms() -> u64 {
    300_000
}
fn default_history_capacity() -> usize {
    256
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_lane_capacity() -> usize {
    64
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            default_script_timeout_ms: default_script_timeout_ms(),
            max_script_timeout_ms: default_max_script_timeout_ms(),
            history_capacity: default_history_capacity(),
            foreground_pid: None,
            max_delay_ms: default_max_delay_ms(),
            lane_capacity: default_lane_capacity(),
        }
    }
}
