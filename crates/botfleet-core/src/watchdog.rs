// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Safe-mode watchdog.
//!
//! Instances with safe mode enabled carry a time budget; once an active
//! instance has been running past that budget the watchdog force-stops
//! it. The sweep only considers `Active` instances: errored or stopped
//! instances have nothing left to stop, and transient ones are already
//! mid-transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info, instrument};

use crate::lifecycle::LifecycleController;
use crate::registry::InstanceRegistry;
use crate::types::{Instance, InstanceStatus};

/// Whether an instance has exhausted its safe-mode budget at `now_ms`.
pub fn budget_expired(instance: &Instance, now_ms: i64, limit: Duration) -> bool {
    if !instance.safe_mode || instance.status != InstanceStatus::Active {
        return false;
    }
    let Some(start) = instance.safe_mode_start_time else {
        return false;
    };
    now_ms.saturating_sub(start) >= limit.as_millis() as i64
}

/// Periodic sweep that stops safe-mode instances past their budget.
pub struct Watchdog {
    registry: InstanceRegistry,
    controller: LifecycleController,
    limit: Duration,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl Watchdog {
    /// Build a watchdog over the shared registry.
    pub fn new(
        registry: InstanceRegistry,
        controller: LifecycleController,
        limit: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            controller,
            limit,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            limit_secs = self.limit.as_secs(),
            "Safe-mode watchdog started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Safe-mode watchdog received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }

        info!("Safe-mode watchdog stopped");
    }

    /// Run one sweep. Returns the ids of the instances that were stopped.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Vec<String> {
        let now_ms = Utc::now().timestamp_millis();
        let expired: Vec<Instance> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|i| budget_expired(i, now_ms, self.limit))
            .collect();

        let mut stopped = Vec::new();
        for instance in expired {
            debug!(id = %instance.id, target = %instance.target_uid, "safe-mode budget exhausted");
            if self.controller.stop(&instance.id, true).await.is_some() {
                stopped.push(instance.id);
            }
        }
        stopped
    }
}
