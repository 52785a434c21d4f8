//! ==============================================================================
//! store.rs - keyed device state with per-device locking
//! ==============================================================================
//!
//! purpose:
//!     owns every DeviceAggregate the process has seen, keyed by device id.
//!     aggregates are created on the first merge that accepts a reading and
//!     are kept for the life of the process.
//!
//! locking:
//!     - the index (`RwLock<HashMap<..>>`) is only held to look up or insert
//!       a handle, never across a merge
//!     - each aggregate sits behind its own `Mutex`, so merges for one device
//!       serialize while different devices proceed independently
//!     - a new aggregate is locked before it is published, so readers wait
//!       for the creating merge instead of seeing an empty aggregate
//!
//! relationships:
//!     - used by: ingest.rs (merge_batch), query.rs (with_device / get)
//!     - uses: domain.rs (DeviceAggregate::merge)
//!
//! ==============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::{DeviceAggregate, MergeStats, Reading};

type DeviceHandle = Arc<Mutex<DeviceAggregate>>;

/// whether a merge found an existing aggregate or had to create one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Found,
    Created,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub device_id: String,
    /// `None` when an empty batch targeted an unknown device
    pub slot: Option<Slot>,
    pub stats: MergeStats,
}

#[derive(Debug, Default)]
pub struct DeviceStore {
    devices: RwLock<HashMap<String, DeviceHandle>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the aggregate for `device_id`, creating it if needed.
    ///
    /// The returned guard is exclusive for that device only.
    pub async fn get_or_create(
        &self,
        device_id: &str,
    ) -> (Slot, OwnedMutexGuard<DeviceAggregate>) {
        if let Some(handle) = self.handle(device_id).await {
            return (Slot::Found, handle.lock_owned().await);
        }

        let mut devices = self.devices.write().await;
        // another merge may have created it between the two lock acquisitions
        let existing = devices.get(device_id).cloned();
        if let Some(handle) = existing {
            drop(devices);
            return (Slot::Found, handle.lock_owned().await);
        }

        let handle = Arc::new(Mutex::new(DeviceAggregate::new(device_id)));
        // uncontended: nobody else can reach this handle yet
        let guard = handle.clone().lock_owned().await;
        devices.insert(device_id.to_string(), handle);
        (Slot::Created, guard)
    }

    /// Merge `readings` into the device's aggregate under its lock.
    pub async fn merge_batch(&self, device_id: &str, readings: Vec<Reading>) -> MergeOutcome {
        if readings.is_empty() {
            // never materialize an aggregate that holds nothing
            let Some(handle) = self.handle(device_id).await else {
                return MergeOutcome {
                    device_id: device_id.to_string(),
                    slot: None,
                    stats: MergeStats::default(),
                };
            };
            let _guard = handle.lock().await;
            return MergeOutcome {
                device_id: device_id.to_string(),
                slot: Some(Slot::Found),
                stats: MergeStats::default(),
            };
        }

        let (slot, mut aggregate) = self.get_or_create(device_id).await;
        let stats = aggregate.merge(readings);
        tracing::debug!(
            device_id,
            applied = stats.applied,
            duplicates = stats.duplicates,
            total_count = aggregate.total_count(),
            "merged batch"
        );

        MergeOutcome {
            device_id: device_id.to_string(),
            slot: Some(slot),
            stats,
        }
    }

    /// Run `f` against the device's aggregate while holding its lock.
    pub async fn with_device<F, R>(&self, device_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&DeviceAggregate) -> R,
    {
        let handle = self.handle(device_id).await?;
        let aggregate = handle.lock().await;
        Some(f(&aggregate))
    }

    /// Snapshot of a device's aggregate.
    pub async fn get(&self, device_id: &str) -> Option<DeviceAggregate> {
        self.with_device(device_id, DeviceAggregate::clone).await
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn handle(&self, device_id: &str) -> Option<DeviceHandle> {
        self.devices.read().await.get(device_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_codec::TimeCodec;

    fn reading(ts: &str, count: i64) -> Reading {
        Reading::new(TimeCodec::parse(ts).unwrap(), count)
    }

    #[tokio::test]
    async fn first_merge_creates_then_finds() {
        let store = DeviceStore::new();
        assert!(store.is_empty().await);

        let outcome = store
            .merge_batch("d1", vec![reading("2024-01-01T00:00:00+00:00", 5)])
            .await;
        assert_eq!(outcome.slot, Some(Slot::Created));
        assert_eq!(outcome.stats.applied, 1);

        let outcome = store
            .merge_batch("d1", vec![reading("2024-01-01T01:00:00+00:00", 3)])
            .await;
        assert_eq!(outcome.slot, Some(Slot::Found));
        assert_eq!(store.len().await, 1);

        let agg = store.get("d1").await.unwrap();
        assert_eq!(agg.total_count(), 8);
    }

    #[tokio::test]
    async fn empty_batch_does_not_create_a_device() {
        let store = DeviceStore::new();
        let outcome = store.merge_batch("ghost", Vec::new()).await;
        assert_eq!(outcome.slot, None);
        assert!(store.get("ghost").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn empty_batch_on_known_device_is_a_no_op() {
        let store = DeviceStore::new();
        store
            .merge_batch("d1", vec![reading("2024-01-01T00:00:00+00:00", 5)])
            .await;
        let before = store.get("d1").await.unwrap();

        let outcome = store.merge_batch("d1", Vec::new()).await;
        assert_eq!(outcome.slot, Some(Slot::Found));
        assert_eq!(outcome.stats, MergeStats::default());
        assert_eq!(store.get("d1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn devices_are_independent() {
        let store = DeviceStore::new();
        store
            .merge_batch("a", vec![reading("2024-01-01T00:00:00+00:00", 1)])
            .await;
        store
            .merge_batch("b", vec![reading("2024-01-01T00:00:00+00:00", 2)])
            .await;

        assert_eq!(store.len().await, 2);
        assert_eq!(store.with_device("a", |d| d.total_count()).await, Some(1));
        assert_eq!(store.with_device("b", |d| d.total_count()).await, Some(2));
    }

    #[tokio::test]
    async fn other_devices_merge_while_one_is_locked() {
        let store = Arc::new(DeviceStore::new());
        store
            .merge_batch("busy", vec![reading("2024-01-01T00:00:00+00:00", 1)])
            .await;

        let (_, guard) = store.get_or_create("busy").await;

        let other = store.clone();
        let merged = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            other.merge_batch("idle", vec![reading("2024-01-01T00:00:00+00:00", 4)]),
        )
        .await
        .expect("merge for another device must not wait on the busy one");
        assert_eq!(merged.stats.applied, 1);

        drop(guard);
        assert_eq!(store.with_device("busy", |d| d.total_count()).await, Some(1));
    }

    #[tokio::test]
    async fn readers_wait_for_an_in_flight_merge() {
        let store = Arc::new(DeviceStore::new());
        store
            .merge_batch("busy", vec![reading("2024-01-01T00:00:00+00:00", 1)])
            .await;
        let wait = std::time::Duration::from_millis(50);

        // existing device: the reader blocks until the merge commits
        let (slot, mut guard) = store.get_or_create("busy").await;
        assert_eq!(slot, Slot::Found);
        let blocked = tokio::time::timeout(wait, store.with_device("busy", |d| d.total_count()));
        assert!(blocked.await.is_err());

        guard.merge(vec![reading("2024-01-01T01:00:00+00:00", 2)]);
        drop(guard);
        assert_eq!(store.with_device("busy", |d| d.total_count()).await, Some(3));

        // fresh device: published locked, never observed empty
        let (slot, mut guard) = store.get_or_create("new").await;
        assert_eq!(slot, Slot::Created);
        let blocked = tokio::time::timeout(wait, store.get("new"));
        assert!(blocked.await.is_err());

        let reader = {
            let store = store.clone();
            tokio::spawn(async move { store.get("new").await })
        };
        guard.merge(vec![reading("2024-01-01T00:00:00+00:00", 7)]);
        drop(guard);

        let seen = reader.await.unwrap().unwrap();
        assert_eq!(seen.total_count(), 7);
        assert!(seen.latest().is_some());
    }
}
