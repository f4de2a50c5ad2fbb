// =============================================================================
// In-memory snapshot store
// =============================================================================
//
// A reader-writer-locked map from workload name to its current snapshot.
// Updates overwrite; reads clone. An optional TTL expires entries lazily:
// an expired entry reports "not found" on read and is dropped on the next
// write to the same workload.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::trace;

use crate::store::Snapshot;

/// Thread-safe single-slot-per-workload snapshot map.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Option<Duration>,
}

struct Entry {
    snapshot: Snapshot,
    stored_at: Instant,
}

impl MemoryStore {
    /// `ttl = None` keeps snapshots until overwritten.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Replace the workload's current snapshot.
    pub fn put(&self, snapshot: Snapshot) {
        let workload = snapshot.workload.clone();
        let mut entries = self.entries.write();
        entries.insert(
            workload.clone(),
            Entry {
                snapshot,
                stored_at: Instant::now(),
            },
        );
        trace!(workload = %workload, "snapshot stored");
    }

    /// Read the current snapshot; expired entries report `None`.
    pub fn get_latest(&self, workload: &str) -> Option<Snapshot> {
        let entries = self.entries.read();
        let entry = entries.get(workload)?;

        if let Some(ttl) = self.ttl {
            if entry.stored_at.elapsed() > ttl {
                trace!(workload, "snapshot expired");
                return None;
            }
        }

        Some(entry.snapshot.clone())
    }
}
