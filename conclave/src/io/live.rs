//! Live progress log for `tail -f` monitoring of a run.
//!
//! An explicit handle opened at run start and closed when the last clone
//! drops — scoped to one run, passed into the process runner and state
//! machine rather than living in ambient global state. Write failures are
//! logged and swallowed: progress mirroring must never take down a run.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct LiveLog {
    inner: Arc<Mutex<BufWriter<File>>>,
    path: PathBuf,
}

impl LiveLog {
    /// Open (append) the live log at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create live log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("open live log {}", path.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::new(file))),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line and flush it.
    pub fn line(&self, msg: &str) {
        self.write_line(&format!("[{}] {msg}", chrono::Local::now().format("%H:%M:%S")));
    }

    /// Append one timestamped line with a source prefix (agent name etc).
    pub fn prefixed(&self, prefix: &str, msg: &str) {
        self.write_line(&format!(
            "[{}] {prefix}: {msg}",
            chrono::Local::now().format("%H:%M:%S")
        ));
    }

    /// Visual separator for phase banners.
    pub fn banner(&self, msg: &str) {
        self.line(&"=".repeat(60));
        self.line(msg);
        self.line(&"=".repeat(60));
    }

    fn write_line(&self, line: &str) {
        let Ok(mut writer) = self.inner.lock() else {
            warn!(path = %self.path.display(), "live log mutex poisoned");
            return;
        };
        if let Err(err) = writeln!(writer, "{line}") {
            warn!(path = %self.path.display(), err = %err, "failed to write live log");
            return;
        }
        if let Err(err) = writer.flush() {
            warn!(path = %self.path.display(), err = %err, "failed to flush live log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_flushed_immediately() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("live.log");
        let live = LiveLog::open(&path).expect("open");

        live.line("starting");
        live.prefixed("critic-a", "reviewing tone");

        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.contains("starting"));
        assert!(contents.contains("critic-a: reviewing tone"));
    }

    #[test]
    fn reopen_appends_rather_than_truncates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("live.log");
        LiveLog::open(&path).expect("open").line("first");
        LiveLog::open(&path).expect("reopen").line("second");

        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
    }
}
