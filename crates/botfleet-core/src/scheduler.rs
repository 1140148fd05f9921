// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic tasks and engine composition.
//!
//! Three named periodic concerns keep a session alive: the telemetry
//! poller (per-instance progress samples feeding the rate estimator),
//! the safe-mode watchdog sweep, and the write-behind persistence flush.
//! [`FleetEngine`] wires them to the shared state, spawns them, and
//! tears them down on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::Result;
use crate::lifecycle::{LifecycleController, LogBuffer};
use crate::persistence::{SaveHandle, SessionStore, Writeback};
use crate::rate::{RateEstimator, should_persist_rate};
use crate::registry::InstanceRegistry;
use crate::telemetry::TelemetryClient;
use crate::types::{Instance, InstanceStatus};
use crate::watchdog::Watchdog;

/// Periodic worker that polls progress telemetry for active instances.
///
/// Each poll feeds the rate estimator; a freshly published rate is
/// occasionally written back onto the instance record so the display
/// has a starting point after a reload.
pub struct TelemetryPoller {
    registry: InstanceRegistry,
    telemetry: TelemetryClient,
    rates: Arc<Mutex<RateEstimator>>,
    saves: SaveHandle,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
}

impl TelemetryPoller {
    /// Create a poller over the shared session state.
    pub fn new(
        registry: InstanceRegistry,
        telemetry: TelemetryClient,
        rates: Arc<Mutex<RateEstimator>>,
        saves: SaveHandle,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            telemetry,
            rates,
            saves,
            poll_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the poll loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Telemetry poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Telemetry poller received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll_active().await;
                }
            }
        }

        info!("Telemetry poller stopped");
    }

    /// Poll every active instance once.
    ///
    /// Only `Active` instances are polled; transient and stopped
    /// instances have no job producing telemetry.
    pub async fn poll_active(&self) {
        let active: Vec<Instance> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|i| i.status == InstanceStatus::Active)
            .collect();

        for instance in active {
            let Some(snapshot) = self.telemetry.fetch_level(&instance.target_uid).await else {
                debug!(id = %instance.id, "level telemetry unavailable this tick");
                continue;
            };
            let Some(metric) = snapshot.current_metric else {
                continue;
            };

            let now_ms = Utc::now().timestamp_millis();
            let published = self.rates.lock().await.observe(&instance.id, now_ms, metric);

            if let Some(rate) = published
                && should_persist_rate()
            {
                self.registry
                    .update(&instance.id, |i| {
                        i.last_known_rate = Some(format!("{rate}/min"));
                    })
                    .await;
                self.saves.request_save();
            }
        }
    }
}

/// The assembled engine: shared state plus its periodic tasks.
///
/// Constructed with [`FleetEngine::start`], stopped with
/// [`FleetEngine::shutdown`]. All command surfaces go through
/// [`FleetEngine::controller`].
pub struct FleetEngine {
    config: Arc<CoreConfig>,
    registry: InstanceRegistry,
    logs: LogBuffer,
    rates: Arc<Mutex<RateEstimator>>,
    controller: LifecycleController,
    telemetry: TelemetryClient,
    writeback: Option<Writeback>,
    poller_shutdown: Arc<Notify>,
    watchdog_shutdown: Arc<Notify>,
    poller_handle: JoinHandle<()>,
    watchdog_handle: JoinHandle<()>,
}

impl FleetEngine {
    /// Load the session (when a store is given), wire the shared state,
    /// and spawn the periodic tasks.
    pub async fn start(
        config: CoreConfig,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let registry = InstanceRegistry::new();
        let logs = LogBuffer::new(config.log_tail);
        let rates = Arc::new(Mutex::new(RateEstimator::new()));
        let telemetry = TelemetryClient::new(&config)?;

        let writeback = if let Some(store) = store {
            match store.load_instances().await {
                Ok(instances) => registry.load(instances).await,
                Err(err) => warn!(%err, "failed to load persisted instances"),
            }
            match store.load_log().await {
                Ok(entries) => logs.load(entries).await,
                Err(err) => warn!(%err, "failed to load persisted console log"),
            }
            Some(Writeback::spawn(
                store,
                registry.clone(),
                logs.clone(),
                config.save_debounce,
            ))
        } else {
            None
        };
        let saves = writeback
            .as_ref()
            .map(|w| w.handle())
            .unwrap_or_else(SaveHandle::disconnected);

        let controller = LifecycleController::new(
            config.clone(),
            registry.clone(),
            logs.clone(),
            rates.clone(),
            saves.clone(),
        );

        let poller = TelemetryPoller::new(
            registry.clone(),
            telemetry.clone(),
            rates.clone(),
            saves.clone(),
            config.poll_interval,
        );
        let poller_shutdown = poller.shutdown_handle();
        let poller_handle = tokio::spawn(async move {
            poller.run().await;
        });

        let watchdog = Watchdog::new(
            registry.clone(),
            controller.clone(),
            config.safe_mode_limit,
            config.watchdog_interval,
        );
        let watchdog_shutdown = watchdog.shutdown_handle();
        let watchdog_handle = tokio::spawn(async move {
            watchdog.run().await;
        });

        info!(
            max_instances = config.max_instances,
            instances = registry.len().await,
            "FleetEngine started"
        );

        Ok(Self {
            config,
            registry,
            logs,
            rates,
            controller,
            telemetry,
            writeback,
            poller_shutdown,
            watchdog_shutdown,
            poller_handle,
            watchdog_handle,
        })
    }

    /// The engine configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The lifecycle command surface.
    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// The shared instance registry.
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// The shared console log.
    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    /// The telemetry client, for on-demand fetches outside the poll loop.
    pub fn telemetry(&self) -> &TelemetryClient {
        &self.telemetry
    }

    /// The currently published rate for an instance, if any.
    pub async fn published_rate(&self, instance_id: &str) -> Option<i64> {
        self.rates.lock().await.published(instance_id)
    }

    /// Stop the periodic tasks and flush the session one last time.
    pub async fn shutdown(self) {
        self.poller_shutdown.notify_one();
        self.watchdog_shutdown.notify_one();
        let _ = self.poller_handle.await;
        let _ = self.watchdog_handle.await;
        if let Some(writeback) = self.writeback {
            writeback.shutdown().await;
        }
        info!("FleetEngine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::AccessPath;
    use crate::types::BotEndpoints;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn poller_for(server_uri: &str, registry: InstanceRegistry) -> TelemetryPoller {
        let config = CoreConfig::new().with_level_url(format!("{server_uri}/level/{{uid}}"));
        let telemetry = TelemetryClient::new(&config)
            .unwrap()
            .with_level_chain(vec![AccessPath::Direct]);
        TelemetryPoller::new(
            registry,
            telemetry,
            Arc::new(Mutex::new(RateEstimator::new())),
            SaveHandle::disconnected(),
            Duration::from_secs(12),
        )
    }

    #[tokio::test]
    async fn test_poll_skips_inactive_instances() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/level/123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"level": 5, "current_exp": 100})),
            )
            .expect(0)
            .mount(&server)
            .await;

        let registry = InstanceRegistry::new();
        let mut instance = Instance::launched("bot", "123");
        instance.status = InstanceStatus::Stopped;
        registry.insert_front(instance).await;

        poller_for(&server.uri(), registry).poll_active().await;
    }

    #[tokio::test]
    async fn test_poll_feeds_rate_estimator() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/level/123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"level": 5, "current_exp": 100})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let registry = InstanceRegistry::new();
        let instance = Instance::launched("bot", "123");
        let id = instance.id.clone();
        registry.insert_front(instance).await;

        let poller = poller_for(&server.uri(), registry);
        poller.poll_active().await;

        let rates = poller.rates.lock().await;
        assert_eq!(rates.published(&id), None, "one sample publishes nothing");
        assert_eq!(rates.sample_count(&id), 1);
    }

    #[tokio::test]
    async fn test_engine_start_and_shutdown_without_store() {
        let config = CoreConfig::new().with_bot(BotEndpoints {
            name: "default".to_string(),
            start_url: "https://jobs.example/add?u={target_uid}".to_string(),
            stop_url: "https://jobs.example/remove?u={target_uid}".to_string(),
        });

        let engine = FleetEngine::start(config, None).await.unwrap();
        assert!(engine.registry().is_empty().await);
        engine.shutdown().await;
    }
}
