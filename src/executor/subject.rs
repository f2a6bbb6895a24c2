//! Subject resolution — which process an action targets.
//!
//! A missing `pid`, or the sentinels `0` and `-1`, mean "the current
//! default subject" (the foreground process). Other negative values are
//! rejected.

use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

use super::errors::{ExecutorError, ProviderError};
use super::params::Params;

/// Parameter carrying the target process.
pub const SUBJECT_PARAM: &str = "pid";

/// The process an action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub pid: u32,
    pub name: Option<String>,
    /// True when the caller did not pick the subject.
    pub defaulted: bool,
}

/// Where subjects come from.
pub trait SubjectSource: Send + Sync {
    /// The current default subject.
    fn foreground(&self) -> Result<Subject, ProviderError>;

    /// Name of a process, if it exists.
    fn describe(&self, pid: u32) -> Option<String>;
}

/// Resolve the subject of a call from its `pid` parameter.
pub fn resolve_subject(params: &Params, source: &dyn SubjectSource) -> Result<Subject, ExecutorError> {
    match params.optional_i64(SUBJECT_PARAM)? {
        None | Some(0) | Some(-1) => source.foreground().map_err(|e| {
            ExecutorError::internal("could not determine the foreground subject", e)
        }),
        Some(pid) if pid < 0 => Err(ExecutorError::invalid(
            SUBJECT_PARAM,
            format!("{pid} is not a valid process id (use 0 or -1 for the foreground process)"),
        )),
        Some(pid) => {
            let pid = u32::try_from(pid).map_err(|_| {
                ExecutorError::invalid(SUBJECT_PARAM, format!("{pid} is out of range"))
            })?;
            Ok(Subject {
                pid,
                name: source.describe(pid),
                defaulted: false,
            })
        }
    }
}

// ─── Process Table ───────────────────────────────────────────────────────────

/// Subjects backed by the OS process table.
///
/// The foreground subject is the configured pid, or the parent process
/// (the program that launched this server).
pub struct ProcessSubjects {
    configured: Option<u32>,
    system: Mutex<System>,
}

impl ProcessSubjects {
    pub fn new(configured: Option<u32>) -> Self {
        Self {
            configured,
            system: Mutex::new(System::new()),
        }
    }

    fn default_pid(&self) -> u32 {
        if let Some(pid) = self.configured {
            return pid;
        }
        #[cfg(unix)]
        {
            std::os::unix::process::parent_id()
        }
        #[cfg(not(unix))]
        {
            std::process::id()
        }
    }
}

impl SubjectSource for ProcessSubjects {
    fn foreground(&self) -> Result<Subject, ProviderError> {
        let pid = self.default_pid();
        Ok(Subject {
            pid,
            name: self.describe(pid),
            defaulted: true,
        })
    }

    fn describe(&self, pid: u32) -> Option<String> {
        let mut system = self.system.lock().ok()?;
        let pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .map(|p| p.name().to_string_lossy().into_owned())
    }
}
