//! Local append-only fallback file.
//!
//! Opened create+append+write-only at mode 0600 per spec §6. All writes
//! are serialized by an internal mutex and followed by `fsync`, mirroring
//! the teacher's pattern of a single `parking_lot::Mutex`-guarded
//! resource (`observability.rs`'s `trace_buffer`) rather than an async
//! lock, since the critical section here is a blocking file write.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::audit::entry::AuditEntry;
use crate::error::CoreResult;

pub struct Fallback {
    path: PathBuf,
    file: Mutex<File>,
}

impl Fallback {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Appends one entry as a JSON line and fsyncs before returning.
    /// If the fallback write itself fails the entry is lost; the
    /// caller is expected to log that loss (spec §4.1 "Failure
    /// semantics" — counters are never double-incremented for it).
    pub fn append(&self, entry: &AuditEntry) -> CoreResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads every line as a JSON-encoded `AuditEntry`. Lines that fail
    /// to parse are skipped with a warning, per spec §4.1.
    pub fn read_all(&self) -> CoreResult<Vec<AuditEntry>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = lineno, error = %e, "skipping unparseable fallback line"),
            }
        }
        Ok(entries)
    }

    /// Atomically replaces the fallback file's contents with `entries`
    /// by writing to a temp file in the same directory and renaming it
    /// over the original, per spec §4.1's recovery contract. Holds
    /// `self.file` for the whole build-write-rename-reopen sequence so
    /// a concurrent `append` can't land in the old file handle in the
    /// window between the rename and the handle swap and be silently
    /// discarded.
    pub fn atomic_rewrite(&self, entries: &[AuditEntry]) -> CoreResult<()> {
        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut file = self.file.lock();

        {
            let mut tmp = open_append_truncate(&tmp_path)?;
            for entry in entries {
                let mut line = serde_json::to_string(entry)?;
                line.push('\n');
                tmp.write_all(line.as_bytes())?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        // Re-open the live handle so subsequent appends land in the
        // file that now sits at `self.path` rather than a stale fd.
        *file = open_append(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_append(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .create(true)
        .append(true)
        .write(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).write(true).open(path)
}

#[cfg(unix)]
fn open_append_truncate(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_append_truncate(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).write(true).truncate(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{Details, EntryType, Severity};

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("axonflow-fallback-test-{name}-{}.jsonl", uuid::Uuid::new_v4()))
    }

    #[test]
    fn append_and_read_round_trips() {
        let path = tmp_path("roundtrip");
        let fb = Fallback::open(&path).unwrap();
        let entry = AuditEntry::new(EntryType::Violation, Severity::High, "c1", "u1")
            .with_details(Details::new().insert_str("policy_name", "p1"));
        fb.append(&entry).unwrap();

        let entries = fb.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].client_id, "c1");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unparseable_lines_are_skipped() {
        let path = tmp_path("skip");
        {
            let mut f = open_append(&path).unwrap();
            writeln!(f, "not json").unwrap();
            let entry = AuditEntry::new(EntryType::Metric, Severity::Low, "c2", "u2");
            writeln!(f, "{}", serde_json::to_string(&entry).unwrap()).unwrap();
        }
        let fb = Fallback::open(&path).unwrap();
        let entries = fb.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn atomic_rewrite_replaces_contents() {
        let path = tmp_path("rewrite");
        let fb = Fallback::open(&path).unwrap();
        let e1 = AuditEntry::new(EntryType::Violation, Severity::High, "c1", "u1");
        let e2 = AuditEntry::new(EntryType::Metric, Severity::Low, "c2", "u2");
        fb.append(&e1).unwrap();
        fb.append(&e2).unwrap();

        fb.atomic_rewrite(&[e2.clone()]).unwrap();
        let entries = fb.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].client_id, "c2");
        std::fs::remove_file(&path).ok();
    }
}
