mod dispatcher;
pub use dispatcher::*;

mod tracker;
pub use tracker::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::SendFailure;

/// Receives every failed send, one at a time, on the dispatcher task.
pub trait ErrorLog: Send + 'static {
    fn log(&mut self, failure: &SendFailure);
}

/// Default error log: one `error` event per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl ErrorLog for TracingLog {
    fn log(&mut self, failure: &SendFailure) {
        tracing::error!(
            attempt = %failure.attempt,
            to = %failure.to,
            template = %failure.template,
            "Failed to send email: {}",
            failure.error
        );
    }
}

/// Counts failures before handing them on. Clones share the count.
#[derive(Debug, Clone, Default)]
pub struct CountingLog<L> {
    inner: L,
    failed: Arc<AtomicUsize>,
}

impl<L> CountingLog<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Failures seen so far. Final once the dispatcher has stopped.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl<L: ErrorLog> ErrorLog for CountingLog<L> {
    fn log(&mut self, failure: &SendFailure) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.inner.log(failure);
    }
}
