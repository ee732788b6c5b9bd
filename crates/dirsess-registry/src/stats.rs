use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lifetime counters for a registry.
#[derive(Debug, Default)]
pub struct RegistryStats {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    registered: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    purged: AtomicU64,
    denied: AtomicU64,
}

/// Point-in-time copy of [`RegistryStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub registered: u64,
    pub completed: u64,
    pub abandoned: u64,
    pub purged: u64,
    pub denied: u64,
}

impl RegistryStats {
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn purged(&self, count: usize) {
        self.purged.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            registered: self.registered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }
}
