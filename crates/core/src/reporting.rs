//! Error reporting: trait for surfacing engine failures to the host.
//!
//! Components accept an `Arc<dyn ErrorReporter>` and report the failures
//! that are not retried automatically (or that exhausted their retries), so
//! the host can forward them to its own crash or analytics tooling.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Where a reported failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Configuration,
    CampaignList,
    DisplayPermission,
    Impressions,
    Cache,
}

#[derive(Debug, Clone)]
pub struct ReportedError {
    pub source: ErrorSource,
    pub message: String,
    /// Fatal errors stop the component that raised them until the next
    /// explicit restart (a new ping request or a new session).
    pub fatal: bool,
    pub timestamp: DateTime<Utc>,
}

impl ReportedError {
    pub fn new(source: ErrorSource, message: impl Into<String>, fatal: bool) -> Self {
        Self {
            source,
            message: message.into(),
            fatal,
            timestamp: Utc::now(),
        }
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: ReportedError);
}

/// Reporter that drops everything; failures are still logged by the caller.
pub struct NoOpReporter;

impl ErrorReporter for NoOpReporter {
    fn report(&self, _error: ReportedError) {}
}

/// In-memory reporter that captures errors for testing.
#[derive(Default)]
pub struct CaptureReporter {
    errors: Mutex<Vec<ReportedError>>,
}

impl CaptureReporter {
    pub fn new() -> Self {
        Self {
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn errors(&self) -> Vec<ReportedError> {
        self.errors
            .lock()
            .map(|errors| errors.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.errors.lock().map(|errors| errors.len()).unwrap_or(0)
    }

    pub fn count_fatal(&self) -> usize {
        self.errors
            .lock()
            .map(|errors| errors.iter().filter(|e| e.fatal).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.clear();
        }
    }
}

impl ErrorReporter for CaptureReporter {
    fn report(&self, error: ReportedError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error);
        }
    }
}

/// Convenience: create a no-op reporter for components that don't need one.
pub fn noop_reporter() -> Arc<dyn ErrorReporter> {
    Arc::new(NoOpReporter)
}

/// Convenience: create a capture reporter for tests.
pub fn capture_reporter() -> Arc<CaptureReporter> {
    Arc::new(CaptureReporter::new())
}
