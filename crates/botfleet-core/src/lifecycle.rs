// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle control.
//!
//! [`LifecycleController`] owns every status transition: launch, start,
//! stop, restart, delete and the safe-mode toggle. Transitions that the
//! current status forbids are logged no-ops rather than errors, and a
//! failed job-control call parks the instance in `Error` instead of
//! bubbling up: the session keeps running whatever one instance does.
//!
//! Every mutation requests a write-behind session save through the
//! attached [`SaveHandle`].

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::CoreConfig;
use crate::endpoint::resolve_template;
use crate::error::{FleetError, Result};
use crate::persistence::SaveHandle;
use crate::rate::RateEstimator;
use crate::registry::InstanceRegistry;
use crate::types::{Instance, InstanceStatus, LogEntry, LogLevel};

/// Bounded session console log, shared across the engine.
///
/// Holds at most `cap` entries; pushing beyond that drops the oldest.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<VecDeque<LogEntry>>>,
    cap: usize,
}

impl LogBuffer {
    /// Create an empty buffer keeping at most `cap` entries.
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(cap))),
            cap,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub async fn push(&self, message: impl Into<String>, level: LogLevel) {
        let entry = LogEntry::new(message, level);
        let mut guard = self.inner.lock().await;
        if guard.len() == self.cap {
            guard.pop_front();
        }
        guard.push_back(entry);
    }

    /// Replace the buffer contents with a loaded tail, keeping only the
    /// newest `cap` entries.
    pub async fn load(&self, entries: Vec<LogEntry>) {
        let skip = entries.len().saturating_sub(self.cap);
        let mut guard = self.inner.lock().await;
        *guard = entries.into_iter().skip(skip).collect();
    }

    /// Clone the current entries, oldest first.
    pub async fn tail(&self) -> Vec<LogEntry> {
        self.inner.lock().await.iter().cloned().collect()
    }

    /// Number of buffered entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the buffer is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Drives instance status transitions against the remote job endpoints.
#[derive(Debug, Clone)]
pub struct LifecycleController {
    config: Arc<CoreConfig>,
    registry: InstanceRegistry,
    logs: LogBuffer,
    rates: Arc<Mutex<RateEstimator>>,
    saves: SaveHandle,
    http: reqwest::Client,
}

impl LifecycleController {
    /// Build a controller over the shared registry, log and rate state.
    pub fn new(
        config: Arc<CoreConfig>,
        registry: InstanceRegistry,
        logs: LogBuffer,
        rates: Arc<Mutex<RateEstimator>>,
        saves: SaveHandle,
    ) -> Self {
        Self {
            config,
            registry,
            logs,
            rates,
            saves,
            http: reqwest::Client::new(),
        }
    }

    /// Create a new instance for `target_uid` and start its remote job.
    ///
    /// Guarded no-ops (empty target, instance limit, duplicate target,
    /// no configured endpoints) log a warning and return `None`. A failed
    /// start call leaves the new instance in `Error`.
    #[instrument(skip(self))]
    pub async fn launch(&self, bot_name: &str, target_uid: &str) -> Option<Instance> {
        let target_uid = target_uid.trim();
        if target_uid.is_empty() {
            self.logs
                .push("Launch ignored: target id required", LogLevel::Warning)
                .await;
            return None;
        }
        if self.registry.len().await >= self.config.max_instances {
            self.logs
                .push(
                    format!(
                        "Launch ignored: instance limit reached (max {})",
                        self.config.max_instances
                    ),
                    LogLevel::Warning,
                )
                .await;
            return None;
        }
        if self.registry.contains_target(target_uid).await {
            self.logs
                .push(
                    format!("Launch ignored: instance for {target_uid} already exists"),
                    LogLevel::Warning,
                )
                .await;
            return None;
        }
        let Some(bot) = self.config.bot(bot_name).cloned() else {
            self.logs
                .push("Launch failed: no job endpoints configured", LogLevel::Error)
                .await;
            return None;
        };

        let instance = Instance::launched(&bot.name, target_uid);
        let id = instance.id.clone();
        self.registry.insert_front(instance).await;
        self.saves.request_save();
        self.logs
            .push(
                format!("Launching instance for {target_uid}"),
                LogLevel::Info,
            )
            .await;

        let updated = match self.call_job(&bot.start_url, target_uid).await {
            Ok(()) => {
                self.logs
                    .push(
                        format!("Instance for {target_uid} started"),
                        LogLevel::Success,
                    )
                    .await;
                self.registry
                    .update(&id, |i| {
                        i.status = InstanceStatus::Active;
                        i.reset_uptime();
                    })
                    .await
            }
            Err(err) => {
                self.logs
                    .push(
                        format!("Start failed for {target_uid}: {err}"),
                        LogLevel::Error,
                    )
                    .await;
                self.registry
                    .update(&id, |i| i.status = InstanceStatus::Error)
                    .await
            }
        };
        self.saves.request_save();
        updated
    }

    /// Start a stopped or errored instance.
    #[instrument(skip(self))]
    pub async fn start(&self, id: &str) -> Option<Instance> {
        let instance = self.registry.get(id).await?;
        if !instance.status.can_start() {
            self.logs
                .push(
                    format!(
                        "Start ignored: {} is {}",
                        instance.target_uid,
                        instance.status.as_str()
                    ),
                    LogLevel::Warning,
                )
                .await;
            return None;
        }
        let bot = self.config.bot(&instance.bot_name).cloned()?;

        self.registry
            .update(id, |i| i.status = InstanceStatus::Restarting)
            .await;
        self.saves.request_save();

        let updated = match self.call_job(&bot.start_url, &instance.target_uid).await {
            Ok(()) => {
                self.logs
                    .push(
                        format!("Instance for {} started", instance.target_uid),
                        LogLevel::Success,
                    )
                    .await;
                let now_ms = Utc::now().timestamp_millis();
                self.registry
                    .update(id, |i| {
                        i.status = InstanceStatus::Active;
                        i.reset_uptime();
                        if i.safe_mode {
                            // A fresh run gets a fresh safe-mode budget.
                            i.safe_mode_start_time = Some(now_ms);
                        }
                    })
                    .await
            }
            Err(err) => {
                self.logs
                    .push(
                        format!("Start failed for {}: {err}", instance.target_uid),
                        LogLevel::Error,
                    )
                    .await;
                self.registry
                    .update(id, |i| i.status = InstanceStatus::Error)
                    .await
            }
        };
        self.saves.request_save();
        updated
    }

    /// Stop a running instance.
    ///
    /// `auto` marks a watchdog-initiated stop; the only difference is the
    /// `[SafeMode]` prefix on the log line.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &str, auto: bool) -> Option<Instance> {
        let instance = self.registry.get(id).await?;
        if !instance.status.can_stop() {
            self.logs
                .push(
                    format!("Stop ignored: {} is already stopped", instance.target_uid),
                    LogLevel::Warning,
                )
                .await;
            return None;
        }
        let bot = self.config.bot(&instance.bot_name).cloned()?;
        let prefix = if auto { "[SafeMode] " } else { "" };

        self.registry
            .update(id, |i| i.status = InstanceStatus::Removing)
            .await;
        self.saves.request_save();

        let updated = match self.call_job(&bot.stop_url, &instance.target_uid).await {
            Ok(()) => {
                self.logs
                    .push(
                        format!("{prefix}Instance for {} stopped", instance.target_uid),
                        LogLevel::Success,
                    )
                    .await;
                self.rates.lock().await.clear(id);
                self.registry
                    .update(id, |i| {
                        i.status = InstanceStatus::Stopped;
                        i.started_timestamp = None;
                        i.safe_mode = false;
                        i.safe_mode_start_time = None;
                    })
                    .await
            }
            Err(err) => {
                self.logs
                    .push(
                        format!("{prefix}Stop failed for {}: {err}", instance.target_uid),
                        LogLevel::Error,
                    )
                    .await;
                self.registry
                    .update(id, |i| i.status = InstanceStatus::Error)
                    .await
            }
        };
        self.saves.request_save();
        updated
    }

    /// Restart an instance: stop its job, then start it again.
    ///
    /// A failed stop aborts the restart and parks the instance in `Error`;
    /// the start call is never attempted on top of an unknown remote state.
    #[instrument(skip(self))]
    pub async fn restart(&self, id: &str) -> Option<Instance> {
        let instance = self.registry.get(id).await?;
        if !instance.status.can_restart() {
            self.logs
                .push(
                    format!(
                        "Restart ignored: {} is being removed",
                        instance.target_uid
                    ),
                    LogLevel::Warning,
                )
                .await;
            return None;
        }
        let bot = self.config.bot(&instance.bot_name).cloned()?;

        self.registry
            .update(id, |i| i.status = InstanceStatus::Restarting)
            .await;
        self.saves.request_save();
        self.logs
            .push(
                format!("Restarting instance for {}", instance.target_uid),
                LogLevel::Info,
            )
            .await;

        if let Err(err) = self.call_job(&bot.stop_url, &instance.target_uid).await {
            self.logs
                .push(
                    format!("Restart aborted for {}: {err}", instance.target_uid),
                    LogLevel::Error,
                )
                .await;
            let updated = self
                .registry
                .update(id, |i| i.status = InstanceStatus::Error)
                .await;
            self.saves.request_save();
            return updated;
        }
        self.rates.lock().await.clear(id);

        let updated = match self.call_job(&bot.start_url, &instance.target_uid).await {
            Ok(()) => {
                self.logs
                    .push(
                        format!("Instance for {} restarted", instance.target_uid),
                        LogLevel::Success,
                    )
                    .await;
                let now_ms = Utc::now().timestamp_millis();
                self.registry
                    .update(id, |i| {
                        i.status = InstanceStatus::Active;
                        i.reset_uptime();
                        if i.safe_mode {
                            i.safe_mode_start_time = Some(now_ms);
                        }
                    })
                    .await
            }
            Err(err) => {
                self.logs
                    .push(
                        format!("Restart failed for {}: {err}", instance.target_uid),
                        LogLevel::Error,
                    )
                    .await;
                self.registry
                    .update(id, |i| i.status = InstanceStatus::Error)
                    .await
            }
        };
        self.saves.request_save();
        updated
    }

    /// Remove an instance from the session.
    ///
    /// The stop endpoint is always called best-effort first, even for
    /// instances already recorded as stopped (the remote job may have
    /// outlived the record); the instance is removed from the registry
    /// whether or not that call succeeds.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Option<Instance> {
        let instance = self.registry.get(id).await?;
        let removed = self
            .registry
            .update(id, |i| i.status = InstanceStatus::Removing)
            .await?;
        self.saves.request_save();

        if let Some(bot) = self.config.bot(&instance.bot_name)
            && let Err(err) = self.call_job(&bot.stop_url, &instance.target_uid).await
        {
            self.logs
                .push(
                    format!(
                        "Stop during removal failed for {}: {err}; removing anyway",
                        instance.target_uid
                    ),
                    LogLevel::Warning,
                )
                .await;
        }

        self.registry.remove(id).await;
        self.rates.lock().await.clear(id);
        self.logs
            .push(
                format!("Removed instance for {}", instance.target_uid),
                LogLevel::Info,
            )
            .await;
        self.saves.request_save();
        Some(removed)
    }

    /// Enable or disable safe mode on an instance.
    ///
    /// Enabling requires a running instance; the safe-mode budget is
    /// anchored to "now" on enable and cleared on disable.
    #[instrument(skip(self))]
    pub async fn set_safe_mode(&self, id: &str, enabled: bool) -> Option<Instance> {
        let instance = self.registry.get(id).await?;
        if enabled && instance.status == InstanceStatus::Stopped {
            self.logs
                .push(
                    format!(
                        "Safe mode ignored: {} is not running",
                        instance.target_uid
                    ),
                    LogLevel::Warning,
                )
                .await;
            return None;
        }
        let now_ms = Utc::now().timestamp_millis();
        let updated = self
            .registry
            .update(id, |i| {
                i.safe_mode = enabled;
                i.safe_mode_start_time = enabled.then_some(now_ms);
            })
            .await?;
        self.logs
            .push(
                format!(
                    "Safe mode {} for {}",
                    if enabled { "enabled" } else { "disabled" },
                    instance.target_uid
                ),
                LogLevel::Info,
            )
            .await;
        self.saves.request_save();
        Some(updated)
    }

    /// Fire one job-control call: resolve the endpoint template and GET it.
    async fn call_job(&self, template: &str, target_uid: &str) -> Result<()> {
        let url = resolve_template(template, target_uid)?;
        debug!(%url, "job-control call");
        let response = self
            .http
            .get(&url)
            .timeout(self.config.job_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "job-control call rejected");
            return Err(FleetError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
