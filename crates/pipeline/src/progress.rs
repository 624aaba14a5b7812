//! Progress reporting: a callback invoked every K records with
//! `(processed, total_if_known)`.

pub type ProgressFn = Box<dyn FnMut(u64, Option<u64>) + Send>;

pub(crate) struct Progress {
    callback: Option<ProgressFn>,
    every: u64,
    total: Option<u64>,
    processed: u64,
}

impl Progress {
    pub(crate) fn new(callback: Option<ProgressFn>, every: u64, total: Option<u64>) -> Progress {
        Progress {
            callback,
            every: every.max(1),
            total,
            processed: 0,
        }
    }

    pub(crate) fn tick(&mut self) {
        self.processed += 1;
        if self.processed % self.every == 0 {
            if let Some(callback) = self.callback.as_mut() {
                callback(self.processed, self.total);
            }
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(callback) = self.callback.as_mut() {
            callback(self.processed, self.total);
        }
    }

    pub(crate) fn into_callback(self) -> Option<ProgressFn> {
        self.callback
    }
}
