//! NDJSON file adapter: one JSON object per line, keys in document order.

use crate::{AdapterError, RecordIter, SourceAdapter};
use mapping::RawRecord;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

pub struct NdjsonSource {
    path: PathBuf,
}

impl NdjsonSource {
    pub fn new(path: impl Into<PathBuf>) -> NdjsonSource {
        NdjsonSource { path: path.into() }
    }

    fn open(&self) -> Result<BufReader<File>, AdapterError> {
        let file = File::open(&self.path).map_err(|e| {
            AdapterError::NotFound(format!("{}: {e}", self.path.display()))
        })?;
        Ok(BufReader::new(file))
    }
}

impl SourceAdapter for NdjsonSource {
    fn read(&mut self) -> Result<RecordIter, AdapterError> {
        let reader = self.open()?;
        let rows = reader
            .lines()
            .enumerate()
            .filter(|(_, line)| match line {
                Ok(text) => !text.trim().is_empty(),
                Err(_) => true,
            })
            .map(|(number, line)| {
                let line = line.map_err(|e| AdapterError::Read(e.to_string()))?;
                serde_json::from_str::<RawRecord>(&line).map_err(|e| {
                    AdapterError::Read(format!("line {}: {e}", number + 1))
                })
            });
        Ok(Box::new(rows))
    }

    fn restartable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn lines_become_records_and_blank_lines_are_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"FirstName":"EDITH","Age":58}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"FirstName":"JOHN","Age":null}}"#).unwrap();

        let mut source = NdjsonSource::new(file.path());
        let rows: Vec<RawRecord> = source.read().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Age"], json!(58));
        assert_eq!(rows[1]["Age"], serde_json::Value::Null);
    }

    #[test]
    fn malformed_lines_are_read_errors_with_a_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"ok":1}}"#).unwrap();
        writeln!(file, "{{broken").unwrap();

        let mut source = NdjsonSource::new(file.path());
        let results: Vec<Result<RawRecord, AdapterError>> = source.read().unwrap().collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(AdapterError::Read(message)) => assert!(message.contains("line 2")),
            other => panic!("expected Read error, got {other:?}"),
        }
    }
}
