//! Emits the short-lived unit summary.

use std::fmt;

use tracing::info;

use super::types::ResourceTotals;

/// Target of summary events. The logging setup routes it to the summary sink.
pub const SUMMARY_TARGET: &str = "pod_lifecycle::summary";

/// One qualifying short-lived unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSummary {
    /// Process-lifetime sequence number, starting at 1.
    pub seq: u64,
    pub namespace: String,
    pub name: String,
    pub total_seconds: f64,
    pub totals: ResourceTotals,
}

impl fmt::Display for LifecycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: Pod {}/{} total running {:.6} seconds, cpuLimit:{}m, memoryLimit:{}b, cpuRequest:{}m, memoryRequest:{}b",
            self.seq,
            self.namespace,
            self.name,
            self.total_seconds,
            self.totals.cpu_limit_milli,
            self.totals.memory_limit_bytes,
            self.totals.cpu_request_milli,
            self.totals.memory_request_bytes,
        )
    }
}

pub trait Reporter {
    fn report(&mut self, summary: &LifecycleSummary);
}

/// Writes summaries as INFO events on [`SUMMARY_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&mut self, summary: &LifecycleSummary) {
        info!(
            target: SUMMARY_TARGET,
            seq = summary.seq,
            namespace = %summary.namespace,
            name = %summary.name,
            total_seconds = summary.total_seconds,
            cpu_limit_milli = summary.totals.cpu_limit_milli,
            memory_limit_bytes = summary.totals.memory_limit_bytes,
            cpu_request_milli = summary.totals.cpu_request_milli,
            memory_request_bytes = summary.totals.memory_request_bytes,
            "{summary}"
        );
    }
}

/// Keeps every summary in memory.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    summaries: Vec<LifecycleSummary>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingReporter {
    pub fn summaries(&self) -> &[LifecycleSummary] {
        &self.summaries
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Reporter for RecordingReporter {
    fn report(&mut self, summary: &LifecycleSummary) {
        self.summaries.push(summary.clone());
    }
}
