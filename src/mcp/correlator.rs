//! Request/response correlation.
//!
//! Every outgoing request is registered here under a fresh id before it is
//! written. The entry is removed by whichever of these happens first:
//!
//! - [`RequestCorrelator::resolve`]: a success response arrived
//! - [`RequestCorrelator::reject`]: an error response arrived
//! - [`RequestCorrelator::fail`]: the write failed, or the reply was malformed
//! - [`RequestCorrelator::on_timeout`]: the per-request deadline elapsed
//! - [`RequestCorrelator::reject_all`]: the connection closed
//!
//! Removal happens under the table lock, so later events for the same id find
//! nothing and become no-ops. Each caller is therefore completed exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::ClientError;
use crate::mcp::observer::{Outcome, RequestObserver, RequestRecord, TracingObserver};
use crate::mcp::protocol::RequestId;

/// How long a request may stay unanswered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    default: Duration,
    per_method: HashMap<String, Duration>,
}

impl TimeoutPolicy {
    /// Deadline applied when nothing else is configured.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// A policy with one deadline for every method.
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_method: HashMap::new(),
        }
    }

    /// Overrides the deadline for one method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>, timeout: Duration) -> Self {
        self.per_method.insert(method.into(), timeout);
        self
    }

    /// The deadline for `method`.
    #[must_use]
    pub fn for_method(&self, method: &str) -> Duration {
        self.per_method.get(method).copied().unwrap_or(self.default)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

/// An outstanding request.
struct PendingRequest {
    method: String,
    registered_at: Instant,
    timeout: Duration,
    slot: oneshot::Sender<Result<Value, ClientError>>,
    timer: JoinHandle<()>,
}

/// Handle the caller awaits for the outcome of one request.
#[derive(Debug)]
pub struct Completion {
    id: RequestId,
    rx: oneshot::Receiver<Result<Value, ClientError>>,
}

impl Completion {
    /// The id the request was registered under.
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.id
    }

    /// Waits for the result.
    ///
    /// # Errors
    ///
    /// Returns the failure reason the request was rejected with, or
    /// [`ClientError::ConnectionClosed`] if the correlator went away.
    pub async fn wait(self) -> Result<Value, ClientError> {
        self.rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }
}

/// Tracks outstanding requests by id.
pub struct RequestCorrelator {
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    policy: TimeoutPolicy,
    observer: Arc<dyn RequestObserver>,
}

impl RequestCorrelator {
    /// Creates a correlator that logs through [`TracingObserver`].
    #[must_use]
    pub fn new(policy: TimeoutPolicy) -> Arc<Self> {
        Self::with_observer(policy, Arc::new(TracingObserver))
    }

    /// Creates a correlator reporting to `observer`.
    #[must_use]
    pub fn with_observer(policy: TimeoutPolicy, observer: Arc<dyn RequestObserver>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            policy,
            observer,
        })
    }

    /// The deadline policy in force.
    #[must_use]
    pub const fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Allocates an id for a new `method` request and starts its deadline.
    pub async fn register(self: &Arc<Self>, method: &str) -> (RequestId, Completion) {
        let id = RequestId::generate();
        let timeout = self.policy.for_method(method);
        let (slot, rx) = oneshot::channel();

        let mut pending = self.pending.lock().await;

        // The timer needs the table lock we are holding, so it cannot fire
        // before the entry is in place.
        let timer = {
            let correlator: Weak<Self> = Arc::downgrade(self);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(correlator) = correlator.upgrade() {
                    correlator.on_timeout(&id).await;
                }
            })
        };

        pending.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                registered_at: Instant::now(),
                timeout,
                slot,
                timer,
            },
        );
        drop(pending);

        tracing::trace!(method, id = %id, ?timeout, "Registered request");

        (id.clone(), Completion { id, rx })
    }

    /// Completes `id` with a result. Returns `false` if nothing was pending.
    pub async fn resolve(&self, id: &RequestId, result: Value) -> bool {
        self.complete(id, Ok(result), Outcome::Success, true).await
    }

    /// Completes `id` with a failure. Returns `false` if nothing was pending.
    pub async fn reject(&self, id: &RequestId, reason: ClientError) -> bool {
        let outcome = outcome_of(&reason);
        self.complete(id, Err(reason), outcome, true).await
    }

    /// Fails `id` for a reason that did not come from a well-formed peer
    /// response. A miss is not reported to the observer.
    pub async fn fail(&self, id: &RequestId, reason: ClientError) -> bool {
        let Some(entry) = self.pending.lock().await.remove(id) else {
            return false;
        };
        let outcome = outcome_of(&reason);
        self.finish(id, entry, Err(reason), outcome, true);
        true
    }

    /// Fails `id` with a timeout. Returns `false` if it already completed.
    pub async fn on_timeout(&self, id: &RequestId) -> bool {
        let Some(entry) = self.pending.lock().await.remove(id) else {
            return false;
        };

        tracing::warn!(method = %entry.method, id = %id, timeout = ?entry.timeout, "Request timed out");

        let reason = ClientError::Timeout {
            method: entry.method.clone(),
            after: entry.timeout,
        };
        self.finish(id, entry, Err(reason), Outcome::Timeout, false);
        true
    }

    /// Fails every outstanding request. Returns how many were pending.
    pub async fn reject_all(&self, reason: impl Fn() -> ClientError) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> =
            self.pending.lock().await.drain().collect();
        let count = drained.len();

        for (id, entry) in drained {
            let reason = reason();
            let outcome = outcome_of(&reason);
            self.finish(&id, entry, Err(reason), outcome, true);
        }

        if count > 0 {
            tracing::debug!(count, "Rejected all pending requests");
        }
        count
    }

    /// Number of outstanding requests.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn complete(
        &self,
        id: &RequestId,
        result: Result<Value, ClientError>,
        outcome: Outcome,
        stop_timer: bool,
    ) -> bool {
        let Some(entry) = self.pending.lock().await.remove(id) else {
            self.observer.on_unknown_response(id);
            return false;
        };
        self.finish(id, entry, result, outcome, stop_timer);
        true
    }

    fn finish(
        &self,
        id: &RequestId,
        entry: PendingRequest,
        result: Result<Value, ClientError>,
        outcome: Outcome,
        stop_timer: bool,
    ) {
        if stop_timer {
            entry.timer.abort();
        }

        self.observer.on_complete(&RequestRecord {
            method: entry.method,
            id: id.clone(),
            latency: entry.registered_at.elapsed(),
            outcome,
        });

        // The caller may have stopped waiting; that is not our concern.
        let _ = entry.slot.send(result);
    }
}

fn outcome_of(reason: &ClientError) -> Outcome {
    match reason {
        ClientError::Rpc { code, .. } => Outcome::RpcError(*code),
        ClientError::Timeout { .. } => Outcome::Timeout,
        ClientError::ConnectionClosed => Outcome::Closed,
        _ => Outcome::Transport,
    }
}
