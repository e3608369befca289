//! Advisory single-writer lock for a state directory.
//!
//! One orchestrator process per state directory: the lock file holds a
//! non-blocking exclusive advisory lock for the life of the process, plus
//! the owner pid and acquisition timestamp for diagnostics. Acquisition
//! fails immediately when another process holds the lock; there is no
//! retry/backoff — the caller surfaces a fatal "already running" error.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = "orchestrator.lock";

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Acquire the exclusive lock for `state_dir`, or fail fast.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        let path = state_dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(anyhow!(
                "another orchestrator holds {} (is a run already in progress?)",
                path.display()
            ));
        }

        file.set_len(0)
            .with_context(|| format!("truncate lock file {}", path.display()))?;
        let stamp = format!(
            "{}\n{}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        file.write_all(stamp.as_bytes())
            .with_context(|| format!("stamp lock file {}", path.display()))?;
        file.flush()
            .with_context(|| format!("flush lock file {}", path.display()))?;

        debug!(path = %path.display(), "lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), err = %err, "failed to release lock");
        }
        debug!(path = %self.path.display(), "lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_in_same_process_fails_fast() {
        let temp = tempfile::tempdir().expect("tempdir");
        let _held = RunLock::acquire(temp.path()).expect("first acquire");

        let err = RunLock::acquire(temp.path()).expect_err("second acquire must fail");
        assert!(err.to_string().contains("another orchestrator"));
    }

    #[test]
    fn lock_is_reacquirable_after_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        {
            let _held = RunLock::acquire(temp.path()).expect("first acquire");
        }
        let _again = RunLock::acquire(temp.path()).expect("reacquire after drop");
    }

    #[test]
    fn lock_file_records_owner_pid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let _held = RunLock::acquire(temp.path()).expect("acquire");

        let contents =
            fs::read_to_string(temp.path().join(LOCK_FILE_NAME)).expect("read lock file");
        let pid_line = contents.lines().next().expect("pid line");
        assert_eq!(pid_line, std::process::id().to_string());
    }
}
