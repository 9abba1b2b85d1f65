//! Per-key mutual exclusion.
//!
//! Merges are serialized per upload key and share transitions per
//! `(owner, recipient, file)` triple. A slot lives in the map only while some
//! task holds or waits for it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default, Debug)]
pub struct KeyedLocks {
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one key, released on drop.
#[derive(Debug)]
pub struct KeyLease {
    key: String,
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other lease for `key` is held, then take it.
    pub async fn acquire(&self, key: impl Into<String>) -> KeyLease {
        let key = key.into();
        let slot = self.slots.entry(key.clone()).or_default().value().clone();
        let guard = slot.lock_owned().await;
        KeyLease {
            key,
            slots: self.slots.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    #[cfg(test)]
    pub fn active_keys(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
impl KeyLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        self.guard.take();
        // only the map's own reference left: nobody else is waiting
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

/// Lock key for a share relationship.
pub fn share_key(owner_id: &str, recipient_id: &str, file_id: &str) -> String {
    format!("share:{owner_id}:{recipient_id}:{file_id}")
}

/// Lock key for merging one upload.
pub fn merge_key(upload_key: &str) -> String {
    format!("merge:{upload_key}")
}
