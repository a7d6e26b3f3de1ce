//! Request/response correlation.
//!
//! Owns the request-id sequence and the table of calls awaiting a response.
//! The table sits behind a single mutex and is only reachable through
//! [`RequestCorrelator`]'s methods; removal and fulfillment happen under the
//! same lock, so a slot is fulfilled at most once.
//!
//! # Lifecycle
//!
//! ```text
//! call() ──next_id()──► register(id) ──► PendingCall
//!                                           │
//!          read loop ──resolve(id, outcome)─┤  (first one wins)
//!          deadline  ──expire(id)───────────┤
//!          disconnect ──fail_all(Stopped)───┘
//! ```

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::RpcError;

/// Outcome delivered to a waiting caller.
pub type CallOutcome = Result<Value, RpcError>;

/// A registered request awaiting its response.
struct PendingRequest {
    method: String,
    timeout: Duration,
    deadline: Instant,
    responder: oneshot::Sender<CallOutcome>,
}

impl PendingRequest {
    fn timeout_error(&self) -> RpcError {
        RpcError::Timeout {
            method: self.method.clone(),
            after: self.timeout,
        }
    }
}

/// Handle returned by [`RequestCorrelator::register`].
///
/// Await it with [`RequestCorrelator::wait`].
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    method: String,
    timeout: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<CallOutcome>,
}

impl PendingCall {
    /// Correlation id of the call.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Id sequence plus pending-request table.
#[derive(Debug)]
pub struct RequestCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("method", &self.method)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    /// Empty table; the first id issued is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Next correlation id. Strictly increasing, never reused.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a pending request for `id` with a deadline `timeout` from now.
    pub fn register(&self, id: u64, method: &str, timeout: Duration) -> PendingCall {
        let (responder, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let entry = PendingRequest {
            method: method.to_string(),
            timeout,
            deadline,
            responder,
        };

        let replaced = self.table().insert(id, entry);
        if let Some(old) = replaced {
            log::warn!("[Shelly] Request id {} registered twice, failing older call", id);
            let _ = old.responder.send(Err(RpcError::Stopped));
        }

        PendingCall {
            id,
            method: method.to_string(),
            timeout,
            deadline,
            rx,
        }
    }

    /// Whether a request with `id` is awaiting a response.
    pub fn contains(&self, id: u64) -> bool {
        self.table().contains_key(&id)
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    /// Fulfill the request for `id`.
    ///
    /// Returns `false` (and does nothing) if no such request is pending:
    /// late, duplicate and already-expired responses are dropped here.
    pub fn resolve(&self, id: u64, outcome: CallOutcome) -> bool {
        let Some(entry) = self.table().remove(&id) else {
            log::trace!("[Shelly] No pending request for id {}", id);
            return false;
        };
        // Receiver may already be gone if the caller was cancelled.
        let _ = entry.responder.send(outcome);
        true
    }

    /// Fail the request for `id` with a timeout error.
    ///
    /// Returns `false` if it was already resolved.
    pub fn expire(&self, id: u64) -> bool {
        let Some(entry) = self.table().remove(&id) else {
            return false;
        };
        log::debug!("[Shelly] Request {} ({}) expired", id, entry.method);
        let err = entry.timeout_error();
        let _ = entry.responder.send(Err(err));
        true
    }

    /// Expire every request whose deadline has passed.
    ///
    /// Catches entries whose callers stopped waiting without cleaning up.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<PendingRequest> = {
            let mut table = self.table();
            let ids: Vec<u64> = table
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };

        let count = overdue.len();
        for entry in overdue {
            let err = entry.timeout_error();
            let _ = entry.responder.send(Err(err));
        }
        count
    }

    /// Remove `id` without fulfilling it (the request was never sent).
    pub fn cancel(&self, id: u64) {
        self.table().remove(&id);
    }

    /// Fail every pending request with `error`. Returns how many were failed.
    pub fn fail_all(&self, error: &RpcError) -> usize {
        let drained: Vec<PendingRequest> = self.table().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.responder.send(Err(error.clone()));
        }
        count
    }

    /// Await the outcome of `call`, expiring it when its deadline passes.
    pub async fn wait(&self, call: PendingCall) -> CallOutcome {
        let PendingCall {
            id,
            method,
            timeout,
            deadline,
            mut rx,
        } = call;

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::Stopped),
            Err(_) => {
                if self.expire(id) {
                    return Err(RpcError::Timeout {
                        method,
                        after: timeout,
                    });
                }
                // Resolved between the deadline firing and the expire.
                rx.try_recv().unwrap_or(Err(RpcError::Timeout {
                    method,
                    after: timeout,
                }))
            }
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending
            .lock()
            .expect("RequestCorrelator mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    const TEN_SECS: Duration = Duration::from_secs(10);

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let correlator = RequestCorrelator::new();
        let ids: Vec<u64> = (0..100).map(|_| correlator.next_id()).collect();
        assert_eq!(ids[0], 1);
        assert!(ids.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn test_ids_unique_under_concurrency() {
        let correlator = Arc::new(RequestCorrelator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&correlator);
            handles.push(tokio::spawn(async move {
                (0..250).map(|_| c.next_id()).collect::<Vec<_>>()
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 2000);
        assert_eq!(all[0], 1);
    }

    #[tokio::test]
    async fn test_resolve_delivers_result() {
        let correlator = RequestCorrelator::new();
        let id = correlator.next_id();
        let call = correlator.register(id, "Shelly.GetStatus", TEN_SECS);

        assert!(correlator.resolve(id, Ok(json!({"ok": true}))));
        assert_eq!(correlator.wait(call).await.unwrap(), json!({"ok": true}));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let correlator = RequestCorrelator::new();
        let first = correlator.register(correlator.next_id(), "A", TEN_SECS);
        let second = correlator.register(correlator.next_id(), "B", TEN_SECS);

        assert!(correlator.resolve(second.id(), Ok(json!("b"))));
        assert!(correlator.resolve(first.id(), Ok(json!("a"))));

        assert_eq!(correlator.wait(first).await.unwrap(), json!("a"));
        assert_eq!(correlator.wait(second).await.unwrap(), json!("b"));
    }

    #[test]
    fn test_resolve_unknown_id_is_noop() {
        let correlator = RequestCorrelator::new();
        assert!(!correlator.resolve(42, Ok(json!(null))));
    }

    #[tokio::test]
    async fn test_duplicate_resolve_is_noop() {
        let correlator = RequestCorrelator::new();
        let call = correlator.register(1, "A", TEN_SECS);
        assert!(correlator.resolve(1, Ok(json!(1))));
        assert!(!correlator.resolve(1, Ok(json!(2))));
        assert_eq!(correlator.wait(call).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces_to_caller() {
        let correlator = RequestCorrelator::new();
        let call = correlator.register(1, "Light.Set", TEN_SECS);
        correlator.resolve(
            1,
            Err(RpcError::Rpc {
                code: -103,
                message: "bad".into(),
            }),
        );
        assert!(matches!(
            correlator.wait(call).await,
            Err(RpcError::Rpc { code: -103, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_deadline_not_earlier() {
        let correlator = RequestCorrelator::new();
        let call = correlator.register(correlator.next_id(), "Shelly.Reboot", TEN_SECS);
        let id = call.id();

        let started = Instant::now();
        let outcome = correlator.wait(call).await;
        let waited = started.elapsed();

        assert!(waited >= TEN_SECS, "timed out early after {waited:?}");
        assert!(waited < TEN_SECS + Duration::from_secs(1));
        assert_eq!(
            outcome,
            Err(RpcError::Timeout {
                method: "Shelly.Reboot".into(),
                after: TEN_SECS
            })
        );
        assert!(!correlator.contains(id));
        // Late response after the timeout is a no-op.
        assert!(!correlator.resolve(id, Ok(json!({}))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_just_before_deadline_wins() {
        let correlator = Arc::new(RequestCorrelator::new());
        let call = correlator.register(1, "A", TEN_SECS);

        let c = Arc::clone(&correlator);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(9)).await;
            c.resolve(1, Ok(json!("in time")));
        });

        assert_eq!(correlator.wait(call).await.unwrap(), json!("in time"));
    }

    #[test]
    fn test_expire_after_resolve_is_noop() {
        let correlator = RequestCorrelator::new();
        let _call = correlator.register(1, "A", TEN_SECS);
        assert!(correlator.resolve(1, Ok(json!(null))));
        assert!(!correlator.expire(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_overdue_sweeps_abandoned_calls() {
        let correlator = RequestCorrelator::new();
        let abandoned = correlator.register(1, "A", Duration::from_secs(1));
        let _fresh = correlator.register(2, "B", Duration::from_secs(60));
        drop(abandoned);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(correlator.expire_overdue(), 1);
        assert!(!correlator.contains(1));
        assert!(correlator.contains(2));
    }

    #[tokio::test]
    async fn test_fail_all_fails_every_pending_call() {
        let correlator = RequestCorrelator::new();
        let a = correlator.register(1, "A", TEN_SECS);
        let b = correlator.register(2, "B", TEN_SECS);

        assert_eq!(correlator.fail_all(&RpcError::Stopped), 2);
        assert_eq!(correlator.wait(a).await, Err(RpcError::Stopped));
        assert_eq!(correlator.wait(b).await, Err(RpcError::Stopped));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_cancel_removes_without_fulfilling() {
        let correlator = RequestCorrelator::new();
        let _call = correlator.register(7, "A", TEN_SECS);
        correlator.cancel(7);
        assert!(!correlator.contains(7));
    }
}
