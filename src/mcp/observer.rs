//! Per-request observability hook.
//!
//! The correlator reports every completed request (method, id, latency and
//! outcome) and every response whose id matched nothing. Plug in
//! [`TracingObserver`] for logs or [`RecordingObserver`] to inspect the
//! records programmatically.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::mcp::protocol::RequestId;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The peer answered with a result.
    Success,
    /// The peer answered with an error code.
    RpcError(i32),
    /// The deadline elapsed first.
    Timeout,
    /// The connection closed first.
    Closed,
    /// The request could not be written.
    Transport,
}

/// One completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Method of the request.
    pub method: String,
    /// Correlation id.
    pub id: RequestId,
    /// Time from registration to completion.
    pub latency: Duration,
    /// How the request ended.
    pub outcome: Outcome,
}

/// Receives request lifecycle events from the correlator.
pub trait RequestObserver: Send + Sync {
    /// Called exactly once per registered request.
    fn on_complete(&self, record: &RequestRecord);

    /// Called when a response arrives for an id with no pending entry.
    fn on_unknown_response(&self, id: &RequestId) {
        let _ = id;
    }
}

/// Logs every record through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RequestObserver for TracingObserver {
    fn on_complete(&self, record: &RequestRecord) {
        tracing::debug!(
            method = %record.method,
            id = %record.id,
            latency_ms = u64::try_from(record.latency.as_millis()).unwrap_or(u64::MAX),
            outcome = ?record.outcome,
            "Request completed"
        );
    }

    fn on_unknown_response(&self, id: &RequestId) {
        tracing::warn!(id = %id, "Response for unknown id");
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    records: Mutex<Vec<RequestRecord>>,
    unknown: Mutex<Vec<RequestId>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed requests, in completion order.
    #[must_use]
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ids of discarded responses, in arrival order.
    #[must_use]
    pub fn unknown_responses(&self) -> Vec<RequestId> {
        self.unknown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records for one id.
    #[must_use]
    pub fn records_for(&self, id: &RequestId) -> Vec<RequestRecord> {
        self.records()
            .into_iter()
            .filter(|record| &record.id == id)
            .collect()
    }
}

impl RequestObserver for RecordingObserver {
    fn on_complete(&self, record: &RequestRecord) {
        TracingObserver.on_complete(record);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }

    fn on_unknown_response(&self, id: &RequestId) {
        TracingObserver.on_unknown_response(id);
        self.unknown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.clone());
    }
}
