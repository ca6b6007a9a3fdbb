//! Correlated request tracking.
//!
//! A [`PendingRequests`] table holds requests awaiting an asynchronous
//! response, keyed by a locally generated [`RequestId`] so out-of-order
//! replies can be matched. Every entry is removed exactly once: by its
//! response, or by [`PendingRequests::fail_all`] when the connection drops.
//! Completion callbacks always run after the table lock is released, so a
//! callback may safely issue new requests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::connector::ConnectionLossHook;

/// Locally generated correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a pending request did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The connection dropped before the response arrived.
    #[error("connection lost before a response arrived")]
    ConnectionLost,
    /// The upstream authority answered with a failure.
    #[error("request rejected upstream: {0}")]
    Rejected(String),
}

/// One-shot completion callback.
pub type Completion<T> = Box<dyn FnOnce(Result<T, RequestError>) + Send>;

struct Entry<R, T> {
    request: R,
    completion: Completion<T>,
}

/// Table of requests awaiting a correlated response.
pub struct PendingRequests<R, T> {
    next_id: AtomicU32,
    entries: Mutex<HashMap<RequestId, Entry<R, T>>>,
}

impl<R: Send + 'static, T: 'static> PendingRequests<R, T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, Entry<R, T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a request and return its correlation id.
    pub fn insert(&self, request: R, completion: Completion<T>) -> RequestId {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries().insert(id, Entry { request, completion });
        id
    }

    /// Remove a request, handing back its data and completion so the caller
    /// can validate the response before completing it.
    pub fn take(&self, id: RequestId) -> Option<(R, Completion<T>)> {
        self.entries()
            .remove(&id)
            .map(|entry| (entry.request, entry.completion))
    }

    /// Remove a request and complete it with `result`. Returns `false` when
    /// the id is unknown (already completed or never issued).
    pub fn complete(&self, id: RequestId, result: Result<T, RequestError>) -> bool {
        match self.take(id) {
            Some((_, completion)) => {
                completion(result);
                true
            }
            None => {
                tracing::debug!(%id, "Response for unknown request ignored");
                false
            }
        }
    }

    /// Fail every outstanding request with `error`, each exactly once.
    /// Returns the number of requests failed.
    pub fn fail_all(&self, error: &RequestError) -> usize {
        let drained: Vec<(RequestId, Entry<R, T>)> = self.entries().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(%id, %error, "Failing pending request");
            (entry.completion)(Err(error.clone()));
        }
        count
    }

    /// Whether `id` is still outstanding.
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries().contains_key(&id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl<R: Send + 'static, T: 'static> Default for PendingRequests<R, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + 'static, T: 'static> ConnectionLossHook for PendingRequests<R, T> {
    fn on_connection_lost(&self) {
        let failed = self.fail_all(&RequestError::ConnectionLost);
        if failed > 0 {
            tracing::info!(failed, "Cancelled pending requests after connection loss");
        }
    }
}
