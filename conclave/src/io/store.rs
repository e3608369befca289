//! Durable file primitives: atomic writes, fsynced appends, tolerant loads.
//!
//! Atomic writes go through a sibling temp file that is fsynced and renamed
//! over the destination, so a reader never observes a partial file and an
//! I/O error leaves the original untouched (the temp file is the only thing
//! that can be corrupted, and it is never promoted).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Atomically replace `path` with `contents` (write temp, fsync, rename).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let tmp_path = temp_sibling(path);
    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create temp file {}", tmp_path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("write temp file {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync temp file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Atomically write `value` as pretty JSON with a trailing newline.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Append one JSONL record and fsync it.
///
/// Not atomic with respect to other records, but durable: a crash leaves
/// only whole records behind.
pub fn append_jsonl_durable<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize jsonl record")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", path.display()))?;
    Ok(())
}

/// Load JSON from `path`, strictly.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Load JSON from `path`; a missing or undecodable file yields `default`.
///
/// Undecodable content is logged, not fatal, so a stray legacy file cannot
/// brick a resume.
pub fn load_json_or<T: DeserializeOwned>(path: &Path, default: T) -> T {
    if !path.exists() {
        return default;
    }
    match load_json(path) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "ignoring undecodable json");
            default
        }
    }
}

/// Read a text file, returning an empty string when it does not exist.
pub fn read_text_or_empty(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => String::new(),
    }
}

/// Write a plain text file atomically, logging at debug.
pub fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    debug!(path = %path.display(), bytes = text.len(), "writing text");
    write_atomic(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn atomic_write_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("sample.json");
        let value = Sample {
            name: "run-1".to_string(),
            count: 3,
        };

        write_json_atomic(&path, &value).expect("write");
        let loaded: Sample = load_json(&path).expect("load");
        assert_eq!(loaded, value);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("sample.json");
        write_atomic(&path, "data\n").expect("write");

        let entries: Vec<_> = fs::read_dir(temp.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("sample.json")]);
    }

    #[test]
    fn stale_temp_file_never_shadows_the_real_value() {
        // Simulates a crash that left a half-written temp sibling behind:
        // the destination must still read back the last committed value.
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let value = Sample {
            name: "committed".to_string(),
            count: 1,
        };
        write_json_atomic(&path, &value).expect("write");

        fs::write(temp.path().join(".state.json.tmp"), "{\"name\": \"trunc").expect("garbage");
        let loaded: Sample = load_json(&path).expect("load");
        assert_eq!(loaded.name, "committed");
    }

    #[test]
    fn overwrite_preserves_old_value_until_rename() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        write_atomic(&path, "first\n").expect("write first");
        write_atomic(&path, "second\n").expect("write second");
        assert_eq!(fs::read_to_string(&path).expect("read"), "second\n");
    }

    #[test]
    fn jsonl_append_accumulates_whole_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("log.jsonl");

        for i in 0..3u32 {
            append_jsonl_durable(
                &path,
                &Sample {
                    name: format!("r{i}"),
                    count: i,
                },
            )
            .expect("append");
        }

        let contents = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let _: Sample = serde_json::from_str(line).expect("whole record per line");
        }
    }

    #[test]
    fn tolerant_load_defaults_on_missing_and_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("missing.json");
        let fallback = Sample {
            name: "default".to_string(),
            count: 0,
        };
        assert_eq!(load_json_or(&missing, fallback.clone()), fallback);

        let corrupt = temp.path().join("corrupt.json");
        fs::write(&corrupt, "{not json").expect("write corrupt");
        assert_eq!(load_json_or(&corrupt, fallback.clone()), fallback);
    }
}
