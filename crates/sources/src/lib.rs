//! Source adapters: finite, single-pass producers of raw records. The
//! pipeline owns an adapter for the duration of a run and pulls one record
//! at a time, so adapters never buffer more than the row they are on.

mod csv_file;
mod memory;
mod ndjson;

pub use self::csv_file::CsvSource;
pub use self::memory::VecSource;
pub use self::ndjson::NdjsonSource;

use mapping::RawRecord;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("authentication to source failed: {0}")]
    Auth(String),

    #[error("cannot connect to source: {0}")]
    Connect(String),

    #[error("failed to read source: {0}")]
    Read(String),
}

/// A lazily-produced stream of records; an `Err` item terminates the run.
pub type RecordIter = Box<dyn Iterator<Item = Result<RawRecord, AdapterError>> + Send>;

/// Producer contract between a tabular source and the pipeline.
pub trait SourceAdapter: Send {
    /// Single-pass stream of raw records. Calling `read` a second time is
    /// adapter-defined; file adapters re-open their input, which makes them
    /// restartable.
    fn read(&mut self) -> Result<RecordIter, AdapterError>;

    /// Ordered batches of at most `size` records. The default chunks `read`.
    fn read_batch(&mut self, size: usize) -> Result<BatchIter, AdapterError> {
        let inner = self.read()?;
        Ok(Box::new(Batches {
            inner,
            size: size.max(1),
            done: false,
        }))
    }

    /// Exact record count when the source knows it cheaply, else `None`.
    fn count(&mut self) -> Option<u64> {
        None
    }

    /// True when `read` can be called again after a completed run.
    fn restartable(&self) -> bool {
        false
    }
}

pub type BatchIter = Box<dyn Iterator<Item = Result<Vec<RawRecord>, AdapterError>> + Send>;

struct Batches {
    inner: RecordIter,
    size: usize,
    done: bool,
}

impl Iterator for Batches {
    type Item = Result<Vec<RawRecord>, AdapterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.size);
        while batch.len() < self.size {
            match self.inner.next() {
                Some(Ok(record)) => batch.push(record),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}
