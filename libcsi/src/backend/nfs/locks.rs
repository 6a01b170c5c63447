//! Per-volume mutual exclusion.
//!
//! Publish and unpublish read the mount table and then act on it; those two
//! steps are not atomic with respect to the host, so every call for the same
//! volume is serialized here.  Calls for different volumes never contend on
//! anything but a [`DashMap`] shard.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::VolumeId;

/// Lock table keyed by [`VolumeId`].
#[derive(Debug, Default)]
pub struct VolumeLocks {
    locks: Arc<DashMap<VolumeId, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one volume.  Released on drop.
#[derive(Debug)]
pub struct VolumeGuard {
    volume_id: VolumeId,
    locks: Arc<DashMap<VolumeId, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl VolumeLocks {
    /// An empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `volume_id`, then hold it.
    pub async fn acquire(&self, volume_id: &VolumeId) -> VolumeGuard {
        let lock = Arc::clone(
            self.locks
                .entry(volume_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = lock.lock_owned().await;
        VolumeGuard {
            volume_id: volume_id.clone(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of volumes with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// `true` when no volume is locked or awaited.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or awaits it.
        self.locks
            .remove_if(&self.volume_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_volume_is_exclusive() {
        let locks = VolumeLocks::new();
        let id = VolumeId::from("h:/e");

        let first = locks.acquire(&id).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&id)).await;
        assert!(blocked.is_err());

        drop(first);
        let _second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&id))
            .await
            .expect("lock released on drop");
    }

    #[tokio::test]
    async fn different_volumes_do_not_contend() {
        let locks = VolumeLocks::new();
        let _a = locks.acquire(&VolumeId::from("h:/a")).await;
        let _b = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&VolumeId::from("h:/b")),
        )
        .await
        .expect("independent volume");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = VolumeLocks::new();
        let id = VolumeId::from("h:/e");
        {
            let _g = locks.acquire(&id).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
