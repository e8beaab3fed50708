//! Diagnostics sinks for errors caught at the rebuild boundary

use crate::error::MockError;
use std::sync::Mutex;

/// Receives every error the pipeline catches instead of propagating.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, error: &MockError);
}

/// Writes caught errors to the `tracing` error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, error: &MockError) {
        tracing::error!("{}", error);
    }
}

/// Keeps the rendered message of every reported error.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl DiagnosticsSink for MemorySink {
    fn report(&self, error: &MockError) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(error.to_string());
        }
    }
}
