//! Progress reporting and cooperative cancellation
use crate::error::ExtractError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// State of an extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressState {
    /// Idle, or completed successfully
    #[default]
    Ready,
    /// Extraction in progress
    Busy,
    /// Extraction stopped on request
    Cancelled,
    /// Extraction failed
    Error,
}

/// Receiver of extraction progress
///
/// The engine only writes to the sink, apart from polling
/// [`is_cancelled`](Self::is_cancelled) between chunks
pub trait ProgressSink: Send + Sync {
    /// Sets the total amount of work, in compressed bytes
    fn set_total_work(&self, bytes: u64);
    /// Adds `bytes` to the amount of work completed
    fn update_completed(&self, bytes: u64);
    /// Whether cancellation was requested
    fn is_cancelled(&self) -> bool;
    /// Sets the extraction state
    fn set_state(&self, state: ProgressState);
    /// Reports a failure
    fn report_error(&self, err: &ExtractError);
}

/// A sink which ignores everything and never cancels
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn set_total_work(&self, _bytes: u64) {}
    fn update_completed(&self, _bytes: u64) {}
    fn is_cancelled(&self) -> bool {
        false
    }
    fn set_state(&self, _state: ProgressState) {}
    fn report_error(&self, _err: &ExtractError) {}
}

/// Shared progress tracker
///
/// Meant to be wrapped in an `Arc` and polled by the caller while the
/// extraction runs on another thread
#[derive(Debug, Default)]
pub struct ExtractionProgress {
    total: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicBool,
    state: Mutex<ProgressState>,
    /// Messages of the reported errors, in order
    errors: Mutex<Vec<String>>,
}

impl ExtractionProgress {
    /// Creates a new tracker in the [`Ready`](ProgressState::Ready) state
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        debug!("Cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Total amount of work
    pub fn total_work(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Completed amount of work
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Current state
    pub fn state(&self) -> ProgressState {
        self.state.lock().map(|s| *s).unwrap_or(ProgressState::Error)
    }

    /// The messages of all the reported errors
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// The message of the last reported error
    pub fn last_error(&self) -> Option<String> {
        self.errors.lock().ok().and_then(|e| e.last().cloned())
    }
}

impl ProgressSink for ExtractionProgress {
    fn set_total_work(&self, bytes: u64) {
        self.total.store(bytes, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    fn update_completed(&self, bytes: u64) {
        self.completed.fetch_add(bytes, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ProgressState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }

    fn report_error(&self, err: &ExtractError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(err.to_string());
        }
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<S> {
    fn set_total_work(&self, bytes: u64) {
        (**self).set_total_work(bytes)
    }
    fn update_completed(&self, bytes: u64) {
        (**self).update_completed(bytes)
    }
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
    fn set_state(&self, state: ProgressState) {
        (**self).set_state(state)
    }
    fn report_error(&self, err: &ExtractError) {
        (**self).report_error(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tracker() {
        let p = ExtractionProgress::new();
        assert_eq!(p.state(), ProgressState::Ready);
        p.set_total_work(100);
        p.update_completed(30);
        p.update_completed(12);
        assert_eq!(p.total_work(), 100);
        assert_eq!(p.completed(), 42);
        assert!(!p.is_cancelled());
        p.cancel();
        assert!(p.is_cancelled());
        p.set_state(ProgressState::Cancelled);
        assert_eq!(p.state(), ProgressState::Cancelled);
        p.report_error(&ExtractError::EntryNotFound("x".into()));
        assert_eq!(p.last_error().as_deref(), Some("entry not found: x"));
        assert_eq!(p.errors().len(), 1);
    }
}
