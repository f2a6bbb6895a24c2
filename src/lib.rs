pub mod engine;
pub mod executor;
pub mod protocol;

use std::path::{Path, PathBuf};

/// Return the platform-standard data directory for actionbridge.
///
/// - macOS: `~/Library/Application Support/actionbridge/`
/// - Windows: `{FOLDERID_RoamingAppData}\actionbridge\`
/// - Linux: `$XDG_DATA_HOME/actionbridge/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.actionbridge/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("actionbridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".actionbridge")
}

/// Default log file inside the data directory.
pub fn default_log_path() -> PathBuf {
    data_dir().join("actionbridge.log")
}

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard error. stdout is reserved for protocol traffic.
    Stderr,
    /// A file, rotated on startup.
    File(PathBuf),
}

/// Initialize the tracing subscriber.
///
/// For file targets, existing logs are rotated first (`actionbridge.log` →
/// `.1` → `.2` → `.3`) and the fresh file is opened with a line-flushing
/// writer. `RUST_LOG` overrides the default filter.
pub fn init_tracing(target: &LogTarget, json: bool) -> std::io::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("actionbridge=info,warn"));

    let writer = match target {
        LogTarget::Stderr => LogWriter::Stderr,
        LogTarget::File(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            rotate_log_file(path, 3);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            LogWriter::File(FlushingWriter::new(file))
        }
    };
    let ansi = matches!(target, LogTarget::Stderr);

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.with_ansi(ansi).try_init()
    };
    installed.map_err(|e| std::io::Error::other(format!("failed to install subscriber: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        target = ?target,
        pid = std::process::id(),
        "=== actionbridge starting ==="
    );
    Ok(())
}

/// Rotate log files: `name.log` → `name.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// Subscriber writer for either target.
#[derive(Clone)]
enum LogWriter {
    Stderr,
    File(FlushingWriter),
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogWriter {
    type Writer = Box<dyn std::io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::Stderr => Box::new(std::io::stderr()),
            Self::File(file) => Box::new(file.clone()),
        }
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Each log line is on disk immediately, so a crash never loses the lines
/// leading up to it.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_keeps_three_generations() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("actionbridge.log");
        for generation in 0..5 {
            std::fs::write(&log, format!("run {generation}")).unwrap();
            rotate_log_file(&log, 3);
        }
        assert!(!log.exists());
        let read = |suffix: u32| {
            std::fs::read_to_string(format!("{}.{suffix}", log.display())).unwrap()
        };
        assert_eq!(read(1), "run 4");
        assert_eq!(read(2), "run 3");
        assert_eq!(read(3), "run 2");
        assert!(!Path::new(&format!("{}.4", log.display())).exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line one\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line one\n");
    }

    #[test]
    fn test_default_log_path_under_data_dir() {
        assert!(default_log_path().starts_with(data_dir()));
    }
}
