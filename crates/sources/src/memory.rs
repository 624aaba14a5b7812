//! In-memory adapter, used by the benchmark verb and by tests.

use crate::{AdapterError, RecordIter, SourceAdapter};
use mapping::RawRecord;

pub struct VecSource {
    records: Vec<RawRecord>,
}

impl VecSource {
    pub fn new(records: Vec<RawRecord>) -> VecSource {
        VecSource { records }
    }
}

impl SourceAdapter for VecSource {
    fn read(&mut self) -> Result<RecordIter, AdapterError> {
        let records = self.records.clone();
        Ok(Box::new(records.into_iter().map(Ok)))
    }

    fn count(&mut self) -> Option<u64> {
        Some(self.records.len() as u64)
    }

    fn restartable(&self) -> bool {
        true
    }
}
