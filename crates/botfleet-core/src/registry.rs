// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared instance registry.
//!
//! The registry is the single shared mutable collection of instances.
//! Asynchronous completions race to update different instances, so every
//! mutation is a read-modify-write by id under the write lock; callers
//! never hold references into the collection across await points.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::types::{Instance, InstanceStatus};

/// Shared, lock-guarded collection of instances.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    inner: Arc<RwLock<Vec<Instance>>>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry contents with a sanitized loaded list.
    pub async fn load(&self, instances: Vec<Instance>) {
        let now_ms = Utc::now().timestamp_millis();
        let mut guard = self.inner.write().await;
        *guard = sanitize(instances, now_ms);
    }

    /// Clone the full instance list.
    pub async fn snapshot(&self) -> Vec<Instance> {
        self.inner.read().await.clone()
    }

    /// Look up one instance by id.
    pub async fn get(&self, id: &str) -> Option<Instance> {
        self.inner.read().await.iter().find(|i| i.id == id).cloned()
    }

    /// Number of tracked instances.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Whether any instance tracks the given target id.
    pub async fn contains_target(&self, target_uid: &str) -> bool {
        self.inner
            .read()
            .await
            .iter()
            .any(|i| i.target_uid == target_uid)
    }

    /// Insert a new instance at the front of the list.
    pub async fn insert_front(&self, instance: Instance) {
        self.inner.write().await.insert(0, instance);
    }

    /// Remove an instance by id. Returns whether anything was removed.
    pub async fn remove(&self, id: &str) -> bool {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|i| i.id != id);
        guard.len() != before
    }

    /// Apply a mutation to one instance by id, returning the updated copy.
    ///
    /// The closure runs under the write lock; the whole list is replaced
    /// atomically from the caller's perspective, so two racing completions
    /// updating different instances cannot lose each other's writes.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Option<Instance>
    where
        F: FnOnce(&mut Instance),
    {
        let mut guard = self.inner.write().await;
        let instance = guard.iter_mut().find(|i| i.id == id)?;
        mutate(instance);
        Some(instance.clone())
    }
}

/// Normalize instances loaded from durable storage.
///
/// - Entries without a target id are dropped.
/// - Transient statuses (`restarting`/`removing`) become `active`: there
///   is no way to know whether the in-flight call completed, so the job is
///   assumed to still be running.
/// - Active instances missing a start timestamp get one ("now") so uptime
///   stays computable.
/// - `safe_mode_start_time` is backfilled when safe mode is on without a
///   recorded start, and cleared when safe mode is off or the instance is
///   stopped. The timer only runs against a live job.
pub fn sanitize(instances: Vec<Instance>, now_ms: i64) -> Vec<Instance> {
    instances
        .into_iter()
        .filter(|i| !i.target_uid.is_empty())
        .map(|mut i| {
            if i.status.is_transient() {
                i.status = InstanceStatus::Active;
            }
            if i.status == InstanceStatus::Active && i.started_timestamp.is_none() {
                i.started_timestamp = Some(now_ms);
            }
            i.safe_mode_start_time = if i.safe_mode && i.status != InstanceStatus::Stopped {
                i.safe_mode_start_time.or(Some(now_ms))
            } else {
                None
            };
            i
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, target: &str, status: InstanceStatus) -> Instance {
        let mut inst = Instance::launched("bot", target);
        inst.id = id.to_string();
        inst.status = status;
        inst
    }

    #[test]
    fn test_sanitize_rewrites_transient_statuses() {
        let loaded = vec![
            instance("a", "1", InstanceStatus::Restarting),
            instance("b", "2", InstanceStatus::Removing),
            instance("c", "3", InstanceStatus::Stopped),
        ];
        let cleaned = sanitize(loaded, 1_000);
        assert_eq!(cleaned[0].status, InstanceStatus::Active);
        assert_eq!(cleaned[1].status, InstanceStatus::Active);
        assert_eq!(cleaned[2].status, InstanceStatus::Stopped);
    }

    #[test]
    fn test_sanitize_drops_empty_targets() {
        let loaded = vec![
            instance("a", "", InstanceStatus::Active),
            instance("b", "2", InstanceStatus::Active),
        ];
        let cleaned = sanitize(loaded, 1_000);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].id, "b");
    }

    #[test]
    fn test_sanitize_backfills_timestamps() {
        let mut active = instance("a", "1", InstanceStatus::Active);
        active.started_timestamp = None;
        active.safe_mode = true;
        active.safe_mode_start_time = None;

        let mut off = instance("b", "2", InstanceStatus::Stopped);
        off.safe_mode = false;
        off.safe_mode_start_time = Some(500);

        let cleaned = sanitize(vec![active, off], 9_000);
        assert_eq!(cleaned[0].started_timestamp, Some(9_000));
        assert_eq!(cleaned[0].safe_mode_start_time, Some(9_000));
        assert_eq!(cleaned[1].safe_mode_start_time, None);
    }

    #[test]
    fn test_sanitize_never_arms_timer_on_stopped_instances() {
        // A stopped record that still carries the flag (e.g. written by an
        // older build) must not come back with a running timer.
        let mut stopped = instance("a", "1", InstanceStatus::Stopped);
        stopped.safe_mode = true;
        stopped.safe_mode_start_time = None;

        let mut stale = instance("b", "2", InstanceStatus::Stopped);
        stale.safe_mode = true;
        stale.safe_mode_start_time = Some(500);

        let cleaned = sanitize(vec![stopped, stale], 99_000);
        assert_eq!(cleaned[0].safe_mode_start_time, None);
        assert_eq!(cleaned[1].safe_mode_start_time, None);
    }

    #[tokio::test]
    async fn test_registry_update_by_id() {
        let registry = InstanceRegistry::new();
        registry
            .insert_front(instance("a", "1", InstanceStatus::Active))
            .await;
        registry
            .insert_front(instance("b", "2", InstanceStatus::Active))
            .await;

        let updated = registry
            .update("a", |i| i.status = InstanceStatus::Error)
            .await
            .unwrap();
        assert_eq!(updated.status, InstanceStatus::Error);

        // The other instance is untouched.
        assert_eq!(
            registry.get("b").await.unwrap().status,
            InstanceStatus::Active
        );
        assert!(registry.update("missing", |_| ()).await.is_none());
    }

    #[tokio::test]
    async fn test_registry_remove_and_contains() {
        let registry = InstanceRegistry::new();
        registry
            .insert_front(instance("a", "1", InstanceStatus::Active))
            .await;

        assert!(registry.contains_target("1").await);
        assert!(registry.remove("a").await);
        assert!(!registry.remove("a").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_registry_insert_front_ordering() {
        let registry = InstanceRegistry::new();
        registry
            .insert_front(instance("old", "1", InstanceStatus::Active))
            .await;
        registry
            .insert_front(instance("new", "2", InstanceStatus::Active))
            .await;

        let all = registry.snapshot().await;
        assert_eq!(all[0].id, "new");
        assert_eq!(all[1].id, "old");
    }
}
