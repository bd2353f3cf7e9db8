//! Correlation registry: turns the asynchronous message stream into
//! request/response calls.
//!
//! A caller [`register`](PendingRequests::register)s the id of the message it
//! is about to send, then [`wait`](PendingRequests::wait)s on the returned
//! [`Waiter`]. The dispatch path calls [`resolve`](PendingRequests::resolve)
//! when a matching response arrives. The entry is gone from the map once the
//! wait is over, even if the waiting future is dropped early.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::types::SlotSdkError;

struct PendingRequest<T> {
    created_at: Instant,
    tx: oneshot::Sender<T>,
}

/// Handle returned by [`PendingRequests::register`].
#[must_use = "a registered request must be awaited or its entry lingers until dropped"]
pub struct Waiter<T> {
    id: String,
    rx: oneshot::Receiver<T>,
}

impl<T> Waiter<T> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Map of outstanding request id → waiting caller.
pub struct PendingRequests<T> {
    entries: Mutex<HashMap<String, PendingRequest<T>>>,
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PendingRequests<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id`. Fails if `id` is already outstanding.
    pub fn register(&self, id: &str) -> Result<Waiter<T>, SlotSdkError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(SlotSdkError::DuplicateRequest(id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(
            id.to_string(),
            PendingRequest {
                created_at: Instant::now(),
                tx,
            },
        );
        Ok(Waiter {
            id: id.to_string(),
            rx,
        })
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Deliver `response` to the caller waiting on `id`.
    ///
    /// Returns `false` when nobody is waiting (the caller already gave up,
    /// or the response is unsolicited).
    pub fn resolve(&self, id: &str, response: T) -> bool {
        let Some(pending) = self.entries.lock().remove(id) else {
            tracing::debug!(message_id = %id, "no pending request for response");
            return false;
        };
        tracing::trace!(
            message_id = %id,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "resolving pending request"
        );
        pending.tx.send(response).is_ok()
    }

    /// Wait for the response to `waiter`, at most `timeout`.
    ///
    /// Returns `None` on timeout. The entry is removed on every path,
    /// including cancellation of this future.
    pub async fn wait(&self, waiter: Waiter<T>, timeout: Duration) -> Option<T> {
        let Waiter { id, rx } = waiter;
        let _entry = RemoveOnDrop {
            entries: &self.entries,
            id: &id,
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Some(response),
            // Sender dropped without a response: treat as a timeout.
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::debug!(
                    message_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "pending request timed out"
                );
                None
            }
        }
    }

    /// Give up on `waiter` without waiting, e.g. when the request could
    /// not be sent.
    pub fn cancel(&self, waiter: Waiter<T>) {
        self.entries.lock().remove(&waiter.id);
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct RemoveOnDrop<'a, T> {
    entries: &'a Mutex<HashMap<String, PendingRequest<T>>>,
    id: &'a str,
}

impl<T> Drop for RemoveOnDrop<'_, T> {
    fn drop(&mut self) {
        self.entries.lock().remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn resolve_wakes_waiter() {
        let pending = PendingRequests::new();
        let waiter = pending.register("req-1").unwrap();

        assert!(pending.resolve("req-1", "ok"));
        let got = pending.wait(waiter, Duration::from_secs(1)).await;

        assert_eq!(got, Some("ok"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let pending = PendingRequests::<()>::new();
        let _waiter = pending.register("req-1").unwrap();
        let err = pending.register("req-1").err().unwrap();
        assert!(matches!(err, SlotSdkError::DuplicateRequest(id) if id == "req-1"));
    }

    #[tokio::test]
    async fn timeout_returns_none_and_removes_entry() {
        let pending = PendingRequests::<u32>::new();
        let waiter = pending.register("req-1").unwrap();
        assert!(pending.contains("req-1"));

        let got = pending.wait(waiter, Duration::from_millis(20)).await;

        assert_eq!(got, None);
        assert!(!pending.contains("req-1"));
    }

    #[tokio::test]
    async fn late_response_is_dropped() {
        let pending = PendingRequests::<u32>::new();
        let waiter = pending.register("req-1").unwrap();
        let _ = pending.wait(waiter, Duration::from_millis(10)).await;

        assert!(!pending.resolve("req-1", 7));
        assert!(pending.is_empty());
    }

    #[test]
    fn unsolicited_response_is_dropped() {
        let pending = PendingRequests::<u32>::new();
        assert!(!pending.resolve("nobody", 1));
    }

    #[tokio::test]
    async fn resolving_one_never_wakes_another() {
        let pending = Arc::new(PendingRequests::<&'static str>::new());
        let a = pending.register("a").unwrap();
        let b = pending.register("b").unwrap();

        assert!(pending.resolve("b", "for-b"));

        let got_a = pending.wait(a, Duration::from_millis(30)).await;
        let got_b = pending.wait(b, Duration::from_millis(30)).await;
        assert_eq!(got_a, None);
        assert_eq!(got_b, Some("for-b"));
        assert!(pending.is_empty());
    }

    #[test]
    fn cancel_removes_entry() {
        let pending = PendingRequests::<u32>::new();
        let waiter = pending.register("req-1").unwrap();
        pending.cancel(waiter);
        assert!(pending.is_empty());
        assert!(pending.register("req-1").is_ok());
    }

    #[tokio::test]
    async fn dropped_wait_removes_entry() {
        let pending = PendingRequests::<u32>::new();
        let waiter = pending.register("req-1").unwrap();

        {
            let fut = pending.wait(waiter, Duration::from_secs(60));
            // Poll once then drop, as a cancelled caller would.
            let _ = tokio::time::timeout(Duration::from_millis(5), fut).await;
        }

        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn concurrent_requests_resolve_independently() {
        let pending = Arc::new(PendingRequests::<usize>::new());
        let mut handles = Vec::new();

        for i in 0..32usize {
            let pending = pending.clone();
            let id = format!("req-{i}");
            let waiter = pending.register(&id).unwrap();
            handles.push(tokio::spawn(async move {
                pending.wait(waiter, Duration::from_secs(5)).await
            }));
        }

        for i in (0..32usize).rev() {
            assert!(pending.resolve(&format!("req-{i}"), i));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Some(i));
        }
        assert!(pending.is_empty());
    }
}
