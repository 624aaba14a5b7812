//! Dead-letter queue: one JSON object per failed record, append-only for
//! the duration of a run. Kept intact (unmasked) because the file exists to
//! be reprocessed; masking happens on the log side only.

use serde_json::{json, Value};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct DeadLetterWriter {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    entries: AtomicU64,
}

impl DeadLetterWriter {
    pub fn create(path: impl AsRef<Path>) -> io::Result<DeadLetterWriter> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(DeadLetterWriter {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            entries: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    /// Appends one entry. Writes are serialized by the internal lock so the
    /// bulk-upsert workers can share the writer.
    pub fn write(&self, reason: &str, kind: &str, message: &str, raw_row: &Value) -> io::Result<()> {
        let entry = json!({
            "reason": reason,
            "error_kind": kind,
            "message": message,
            "raw_row": raw_row,
        });
        // A Value always serializes; the fallback covers rows that somehow
        // hold non-string keys after future refactors.
        let line = serde_json::to_string(&entry)
            .unwrap_or_else(|_| format!("{{\"reason\":{reason:?},\"raw_row\":\"{raw_row:?}\"}}"));
        let mut writer = self.writer.lock().expect("dead-letter lock poisoned");
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        self.entries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes and closes the file.
    pub fn finish(self) -> io::Result<PathBuf> {
        let mut writer = self.writer.into_inner().expect("dead-letter lock poisoned");
        writer.flush()?;
        Ok(self.path)
    }
}
