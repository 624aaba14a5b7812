//! CSV file adapter. Headers come from the first row; every cell is kept as
//! a string (empty cells become null) so that type decisions stay with the
//! mapping layer rather than the reader.

use crate::{AdapterError, RecordIter, SourceAdapter};
use mapping::RawRecord;
use serde_json::Value;
use std::fs::File;
use std::path::PathBuf;

pub struct CsvSource {
    path: PathBuf,
    delimiter: u8,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> CsvSource {
        CsvSource {
            path: path.into(),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> CsvSource {
        self.delimiter = delimiter;
        self
    }

    fn open(&self) -> Result<csv::Reader<File>, AdapterError> {
        let file = File::open(&self.path).map_err(|e| {
            AdapterError::NotFound(format!("{}: {e}", self.path.display()))
        })?;
        Ok(csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            // Ragged rows surface as per-record read errors, not a panic.
            .flexible(true)
            .from_reader(file))
    }
}

impl SourceAdapter for CsvSource {
    fn read(&mut self) -> Result<RecordIter, AdapterError> {
        let mut reader = self.open()?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AdapterError::Read(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        tracing::debug!(path = %self.path.display(), columns = headers.len(), "opened csv source");

        let rows = reader.into_records().map(move |row| {
            let row = row.map_err(|e| AdapterError::Read(e.to_string()))?;
            let mut record = RawRecord::with_capacity(headers.len());
            for (index, header) in headers.iter().enumerate() {
                let cell = row.get(index).unwrap_or("");
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                record.insert(header.clone(), value);
            }
            Ok(record)
        });
        Ok(Box::new(rows))
    }

    fn count(&mut self) -> Option<u64> {
        // Counting means a full extra pass; worth it only because progress
        // displays want a total and CSV sources are local files.
        let mut reader = self.open().ok()?;
        let mut n = 0u64;
        let mut row = csv::StringRecord::new();
        loop {
            match reader.read_record(&mut row) {
                Ok(true) => n += 1,
                Ok(false) => return Some(n),
                Err(_) => return None,
            }
        }
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

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn rows_become_records_with_null_empties() {
        let file = write_csv("FirstName,LastName,MiddleName\nEDITH,ADAMS,\nJOHN,DOE,Q\n");
        let mut source = CsvSource::new(file.path());
        let rows: Vec<RawRecord> = source.read().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["FirstName"], json!("EDITH"));
        assert_eq!(rows[0]["MiddleName"], Value::Null);
        assert_eq!(rows[1]["MiddleName"], json!("Q"));
        // Column order is the header order.
        assert_eq!(
            rows[0].keys().collect::<Vec<_>>(),
            vec!["FirstName", "LastName", "MiddleName"]
        );
    }

    #[test]
    fn count_matches_row_total() {
        let file = write_csv("a,b\n1,2\n3,4\n5,6\n");
        let mut source = CsvSource::new(file.path());
        assert_eq!(source.count(), Some(3));
        // Counting must not consume the stream.
        let rows: Vec<RawRecord> = source.read().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn missing_file_is_not_found() {
        let mut source = CsvSource::new("/definitely/not/here.csv");
        match source.read() {
            Err(AdapterError::NotFound(message)) => {
                assert!(message.contains("not/here.csv"));
            }
            Err(other) => panic!("expected NotFound, got {other:?}"),
            Ok(_) => panic!("expected NotFound, got a reader"),
        }
    }

    #[test]
    fn tab_delimited_files_are_supported() {
        let file = write_csv("a\tb\n1\t2\n");
        let mut source = CsvSource::new(file.path()).with_delimiter(b'\t');
        let rows: Vec<RawRecord> = source.read().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows[0]["b"], json!("2"));
    }
}
