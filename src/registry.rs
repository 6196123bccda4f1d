//! Pending-invocation registry.
//!
//! Maps a caller-local correlation id to the single-slot sink its
//! `invoke` is waiting on. Shared between the receive path (lookups)
//! and invoking tasks (register/remove), so mutation takes the write
//! lock while delivery only reads.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::protocol::CallerRecv;

/// Concurrency-safe table of in-flight invocations.
///
/// Each entry holds the sending side of a capacity-1 channel; the
/// matching receiver is owned by the `invoke` call that registered it.
/// Registration always precedes the request hitting the wire, so the
/// sink exists before any response can possibly arrive.
pub struct InvocationRegistry {
    entries: RwLock<HashMap<u64, mpsc::Sender<CallerRecv>>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a waiter under `id` and return its result sink.
    ///
    /// The caller must pair this with [`remove`](Self::remove) on every
    /// exit path; ids are never reused while an entry is pending.
    pub fn register(&self, id: u64) -> mpsc::Receiver<CallerRecv> {
        let (tx, rx) = mpsc::channel(1);
        self.entries.write().unwrap().insert(id, tx);
        rx
    }

    /// Remove the entry for `id`, if any.
    pub fn remove(&self, id: u64) {
        self.entries.write().unwrap().remove(&id);
    }

    /// Deliver a result to the waiter registered under its id.
    ///
    /// Non-blocking: the sink has capacity for exactly one result, and
    /// a duplicate delivery for the same id is dropped. Returns false
    /// when no waiter exists (already timed out and removed, or
    /// spurious) - the caller treats that as a silent drop.
    pub fn resolve(&self, result: CallerRecv) -> bool {
        let entries = self.entries.read().unwrap();
        match entries.get(&result.id) {
            Some(tx) => tx.try_send(result).is_ok(),
            None => false,
        }
    }

    /// Number of in-flight invocations.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for InvocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
