//! Acknowledgement correlation registry.
//!
//! Each emit-with-ack allocates the next correlation id from a monotonic
//! counter and parks a oneshot continuation under it. The inbound dispatch
//! loop resolves ids as Ack packets arrive; everything left over is
//! discarded, never invoked, when the session closes.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use tether_protocol::Value;

struct PendingAck {
    tx: oneshot::Sender<Vec<Value>>,
    created_at: Instant,
}

/// Correlation-id registry, instance-owned per session.
///
/// `register` is collision-free under unbounded concurrent callers: the id
/// comes from an atomic counter and the map insert is synchronized.
#[derive(Default)]
pub struct AckRegistry {
    next_id: AtomicU64,
    pending: DashMap<u64, PendingAck>,
}

impl AckRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next correlation id and park a continuation for it.
    #[must_use]
    pub fn register(&self) -> (u64, oneshot::Receiver<Vec<Value>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingAck {
                tx,
                created_at: Instant::now(),
            },
        );
        (id, rx)
    }

    /// Complete the continuation parked under `id` with the decoded
    /// arguments.
    ///
    /// Unknown ids are a no-op (late or duplicate ack, or a reset session);
    /// returns whether a continuation was found.
    pub fn resolve(&self, id: u64, args: Vec<Value>) -> bool {
        let Some((_, entry)) = self.pending.remove(&id) else {
            debug!(id, "Ack for unknown correlation id ignored");
            return false;
        };

        trace!(id, age_ms = entry.created_at.elapsed().as_millis() as u64, "Ack resolved");
        // The caller may have given up waiting; a dropped receiver is fine.
        let _ = entry.tx.send(args);
        true
    }

    /// Drop one pending continuation without invoking it (emit-with-ack
    /// deadline expired).
    pub fn discard(&self, id: u64) {
        self.pending.remove(&id);
    }

    /// Drop all outstanding continuations without invoking them.
    pub fn clear(&self) {
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            debug!(dropped, "Discarded pending acks on session close");
        }
    }

    /// Number of continuations still waiting.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
