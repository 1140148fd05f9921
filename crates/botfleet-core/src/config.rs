// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration.
//!
//! The configuration surface is consumed read-only by the core: job-control
//! endpoint templates and the instance limit are per session, telemetry
//! endpoint templates and the safe-mode duration are global.

use std::time::Duration;

use crate::error::{FleetError, Result};
use crate::types::BotEndpoints;

/// Default progress telemetry endpoint template.
pub const DEFAULT_LEVEL_URL: &str = "https://danger-level-info.vercel.app/level/{uid}";

/// Default profile telemetry endpoint template.
pub const DEFAULT_PROFILE_URL: &str = "https://sagar-banner.vercel.app/profile?uid={uid}";

/// Configuration for the botfleet engine.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Named job-control endpoint sets available to this session.
    pub bots: Vec<BotEndpoints>,
    /// Maximum number of tracked instances for this session.
    pub max_instances: usize,
    /// Progress telemetry endpoint template.
    pub level_url: String,
    /// Profile telemetry endpoint template.
    pub profile_url: String,
    /// How long a safe-mode instance may remain active before the
    /// watchdog force-stops it.
    pub safe_mode_limit: Duration,
    /// Interval between watchdog sweeps.
    pub watchdog_interval: Duration,
    /// Interval between telemetry polls per instance.
    pub poll_interval: Duration,
    /// Timeout for job-control calls.
    pub job_timeout: Duration,
    /// Timeout for each progress telemetry attempt.
    pub level_timeout: Duration,
    /// Timeout for each profile telemetry attempt.
    pub profile_timeout: Duration,
    /// Debounce window for write-behind session saves.
    pub save_debounce: Duration,
    /// Number of trailing log entries persisted with the session.
    pub log_tail: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bots: Vec::new(),
            max_instances: 1,
            level_url: DEFAULT_LEVEL_URL.to_string(),
            profile_url: DEFAULT_PROFILE_URL.to_string(),
            safe_mode_limit: Duration::from_secs(60 * 60),
            watchdog_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(12),
            job_timeout: Duration::from_secs(8),
            level_timeout: Duration::from_secs(6),
            profile_timeout: Duration::from_secs(5),
            save_debounce: Duration::from_secs(1),
            log_tail: 50,
        }
    }
}

impl CoreConfig {
    /// Create a configuration with default values and no bots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from environment variables.
    ///
    /// Required:
    /// - `BOTFLEET_START_URL`: job start endpoint template
    /// - `BOTFLEET_STOP_URL`: job stop endpoint template
    ///
    /// Optional (with defaults):
    /// - `BOTFLEET_BOT_NAME`: endpoint set name (default: "default")
    /// - `BOTFLEET_MAX_INSTANCES`: instance limit (default: 1)
    /// - `BOTFLEET_LEVEL_URL`: progress telemetry template
    /// - `BOTFLEET_PROFILE_URL`: profile telemetry template
    /// - `BOTFLEET_SAFE_MODE_LIMIT_MINUTES`: safe-mode budget (default: 60)
    pub fn from_env() -> Result<Self> {
        let start_url = std::env::var("BOTFLEET_START_URL")
            .map_err(|_| FleetError::Config("missing BOTFLEET_START_URL".to_string()))?;
        let stop_url = std::env::var("BOTFLEET_STOP_URL")
            .map_err(|_| FleetError::Config("missing BOTFLEET_STOP_URL".to_string()))?;
        let bot_name =
            std::env::var("BOTFLEET_BOT_NAME").unwrap_or_else(|_| "default".to_string());

        let max_instances: usize = std::env::var("BOTFLEET_MAX_INSTANCES")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|_| {
                FleetError::Config("invalid BOTFLEET_MAX_INSTANCES: must be an integer".to_string())
            })?;

        let safe_mode_minutes: u64 = std::env::var("BOTFLEET_SAFE_MODE_LIMIT_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| {
                FleetError::Config(
                    "invalid BOTFLEET_SAFE_MODE_LIMIT_MINUTES: must be an integer".to_string(),
                )
            })?;

        let mut config = Self {
            bots: vec![BotEndpoints {
                name: bot_name,
                start_url,
                stop_url,
            }],
            max_instances,
            safe_mode_limit: Duration::from_secs(safe_mode_minutes * 60),
            ..Self::default()
        };

        if let Ok(url) = std::env::var("BOTFLEET_LEVEL_URL") {
            config.level_url = url;
        }
        if let Ok(url) = std::env::var("BOTFLEET_PROFILE_URL") {
            config.profile_url = url;
        }

        Ok(config)
    }

    /// Add a named endpoint set.
    pub fn with_bot(mut self, bot: BotEndpoints) -> Self {
        self.bots.push(bot);
        self
    }

    /// Set the instance limit.
    pub fn with_max_instances(mut self, limit: usize) -> Self {
        self.max_instances = limit;
        self
    }

    /// Set the progress telemetry endpoint template.
    pub fn with_level_url(mut self, url: impl Into<String>) -> Self {
        self.level_url = url.into();
        self
    }

    /// Set the profile telemetry endpoint template.
    pub fn with_profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = url.into();
        self
    }

    /// Set the safe-mode time budget.
    pub fn with_safe_mode_limit(mut self, limit: Duration) -> Self {
        self.safe_mode_limit = limit;
        self
    }

    /// Set the watchdog sweep interval.
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Set the telemetry poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the write-behind debounce window.
    pub fn with_save_debounce(mut self, debounce: Duration) -> Self {
        self.save_debounce = debounce;
        self
    }

    /// Resolve the endpoint set an instance is pinned to.
    ///
    /// Falls back to the first configured set when the pinned name is gone;
    /// a renamed bot should not strand its running instances.
    pub fn bot(&self, name: &str) -> Option<&BotEndpoints> {
        self.bots
            .iter()
            .find(|b| b.name == name)
            .or_else(|| self.bots.first())
    }
}
