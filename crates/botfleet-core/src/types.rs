// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core types for botfleet.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Worker instance status.
///
/// The lifecycle controller is the only component allowed to change an
/// instance's status; every transition goes through its guard predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// The remote job is running.
    Active,
    /// A stop-then-start sequence is in flight.
    Restarting,
    /// A stop call is in flight (set optimistically before the call).
    Removing,
    /// The remote job was stopped; the instance can be started again.
    Stopped,
    /// The last job-control call failed; resumable like `Stopped`.
    Error,
}

impl InstanceStatus {
    /// A transient status only exists while a remote call is outstanding.
    ///
    /// Transient statuses never survive a reload: there is no way to know
    /// whether the in-flight call completed, so loading reinterprets them
    /// as `Active`.
    pub fn is_transient(&self) -> bool {
        matches!(self, InstanceStatus::Restarting | InstanceStatus::Removing)
    }

    /// Whether `start` may be issued from this status.
    pub fn can_start(&self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Error)
    }

    /// Whether `stop` may be issued from this status.
    pub fn can_stop(&self) -> bool {
        !matches!(self, InstanceStatus::Stopped)
    }

    /// Whether `restart` may be issued from this status.
    pub fn can_restart(&self) -> bool {
        !matches!(self, InstanceStatus::Removing)
    }

    /// String form used for display and persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "active",
            InstanceStatus::Restarting => "restarting",
            InstanceStatus::Removing => "removing",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
        }
    }

    /// Parse a persisted status string, defaulting unknown values to `Stopped`.
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => InstanceStatus::Active,
            "restarting" => InstanceStatus::Restarting,
            "removing" => InstanceStatus::Removing,
            "error" => InstanceStatus::Error,
            _ => InstanceStatus::Stopped,
        }
    }
}

/// One remote job handle tracked by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Opaque unique identifier, generated at creation, immutable.
    pub id: String,
    /// Name of the bot endpoint set this instance was launched with.
    pub bot_name: String,
    /// Job argument substituted into the endpoint templates; immutable.
    pub target_uid: String,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Human-readable launch time, for display only.
    pub started_at: String,
    /// Epoch ms of the last successful transition to `Active`.
    /// Absent until the job has actually been active. Used for uptime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_timestamp: Option<i64>,
    /// Whether the safe-mode time budget applies to this instance.
    #[serde(default)]
    pub safe_mode: bool,
    /// Epoch ms at which safe mode was turned on, cleared when it is
    /// turned off or the instance stops.
    #[serde(default)]
    pub safe_mode_start_time: Option<i64>,
    /// Last persisted throughput estimate; a display cache hint, not
    /// authoritative. Pre-seeds the rate display after a reload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_rate: Option<String>,
}

impl Instance {
    /// Create a freshly launched instance in the `Active` state.
    pub fn launched(bot_name: impl Into<String>, target_uid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            bot_name: bot_name.into(),
            target_uid: target_uid.into(),
            status: InstanceStatus::Active,
            started_at: now.format("%H:%M:%S").to_string(),
            started_timestamp: Some(now.timestamp_millis()),
            safe_mode: false,
            safe_mode_start_time: None,
            last_known_rate: None,
        }
    }

    /// Reset the uptime fields to "now". Called on every successful
    /// transition to `Active`.
    pub fn reset_uptime(&mut self) {
        let now = Utc::now();
        self.started_at = now.format("%H:%M:%S").to_string();
        self.started_timestamp = Some(now.timestamp_millis());
    }

    /// Formatted uptime given the current time in epoch ms.
    ///
    /// Returns `None` unless the instance is active (or restarting) and has
    /// a recorded start timestamp.
    pub fn uptime(&self, now_ms: i64) -> Option<String> {
        if !matches!(
            self.status,
            InstanceStatus::Active | InstanceStatus::Restarting
        ) {
            return None;
        }
        let started = self.started_timestamp?;
        let diff = (now_ms - started).max(0);
        let hours = diff / 3_600_000;
        let minutes = (diff % 3_600_000) / 60_000;
        let seconds = (diff % 60_000) / 1_000;
        Some(format!("{}h {}m {}s", hours, minutes, seconds))
    }
}

/// Severity of a console log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Neutral progress message.
    Info,
    /// An operation completed successfully.
    Success,
    /// An operation failed.
    Error,
    /// Something is off but the operation continues.
    Warning,
}

/// One entry of the bounded session console log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Opaque unique identifier.
    pub id: String,
    /// Human-readable wall-clock time of the entry.
    pub timestamp: String,
    /// Message text.
    pub message: String,
    /// Severity.
    pub level: LogLevel,
}

impl LogEntry {
    /// Create a log entry timestamped "now".
    pub fn new(message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now().format("%H:%M:%S").to_string(),
            message: message.into(),
            level,
        }
    }
}

/// Telemetry kinds fetched per instance, each with its own endpoint
/// template and timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    /// Progress data: level, cumulative metric, target metric.
    Level,
    /// Profile data: banner, avatar, nickname.
    Profile,
}

impl TelemetryKind {
    /// String form for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::Level => "level",
            TelemetryKind::Profile => "profile",
        }
    }
}

/// One named set of job-control endpoint templates.
///
/// `start_url` and `stop_url` are URL patterns containing a `{target_uid}`
/// placeholder, resolved at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotEndpoints {
    /// Display name; instances are pinned to their bot by this name.
    pub name: String,
    /// Template invoked to start the remote job.
    pub start_url: String,
    /// Template invoked to stop the remote job.
    pub stop_url: String,
}

/// Progress telemetry extracted from one fetch, schema-agnostic.
///
/// Every field is best-effort; the source's schema is not fixed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelSnapshot {
    /// Current level number.
    pub level: Option<i64>,
    /// Cumulative progress metric (e.g. experience points).
    pub current_metric: Option<i64>,
    /// Metric value at which the current level began.
    pub start_metric: Option<i64>,
    /// Metric value required for the next level.
    pub target_metric: Option<i64>,
    /// Remaining metric reported directly by the source, if any.
    pub needed_metric: Option<i64>,
    /// Percent complete reported directly by the source, if any.
    pub percent: Option<f64>,
    /// Player display name.
    pub nickname: Option<String>,
    /// ETA string reported directly by the source, if any.
    pub eta: Option<String>,
}

impl LevelSnapshot {
    /// Percent complete toward the next level.
    ///
    /// Prefers the source-reported percent; otherwise derives it from the
    /// start/current/target metrics. Returns 0.0 when underivable.
    pub fn percent_complete(&self) -> f64 {
        if let Some(p) = self.percent {
            return if p.is_nan() { 0.0 } else { p };
        }
        let current = self.current_metric.unwrap_or(0);
        let start = self.start_metric.unwrap_or(0);
        let target = self.target_metric.unwrap_or(0);
        if target > start {
            ((current - start) as f64 / (target - start) as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Metric still needed to reach the next level.
    pub fn remaining(&self) -> i64 {
        if let Some(needed) = self.needed_metric
            && needed > 0
        {
            return needed;
        }
        let current = self.current_metric.unwrap_or(0);
        let target = self.target_metric.unwrap_or(0);
        (target - current).max(0)
    }
}

/// Profile telemetry extracted from one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSnapshot {
    /// Banner image URL, possibly empty.
    pub banner: String,
    /// Avatar image URL, possibly empty.
    pub avatar: String,
    /// Player display name, possibly empty.
    pub nickname: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_guards() {
        assert!(InstanceStatus::Stopped.can_start());
        assert!(InstanceStatus::Error.can_start());
        assert!(!InstanceStatus::Active.can_start());
        assert!(!InstanceStatus::Restarting.can_start());

        assert!(InstanceStatus::Active.can_stop());
        assert!(InstanceStatus::Restarting.can_stop());
        assert!(InstanceStatus::Error.can_stop());
        assert!(!InstanceStatus::Stopped.can_stop());

        assert!(InstanceStatus::Active.can_restart());
        assert!(InstanceStatus::Stopped.can_restart());
        assert!(!InstanceStatus::Removing.can_restart());
    }

    #[test]
    fn test_status_transient() {
        assert!(InstanceStatus::Restarting.is_transient());
        assert!(InstanceStatus::Removing.is_transient());
        assert!(!InstanceStatus::Active.is_transient());
        assert!(!InstanceStatus::Stopped.is_transient());
        assert!(!InstanceStatus::Error.is_transient());
    }

    #[test]
    fn test_status_serde_round_trip() {
        let json = serde_json::to_string(&InstanceStatus::Restarting).unwrap();
        assert_eq!(json, "\"restarting\"");
        let back: InstanceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, InstanceStatus::Restarting);
    }

    #[test]
    fn test_status_parse_unknown_defaults_to_stopped() {
        assert_eq!(InstanceStatus::parse("bogus"), InstanceStatus::Stopped);
        assert_eq!(InstanceStatus::parse("active"), InstanceStatus::Active);
    }

    #[test]
    fn test_launched_instance() {
        let inst = Instance::launched("alpha", "123");
        assert_eq!(inst.status, InstanceStatus::Active);
        assert_eq!(inst.bot_name, "alpha");
        assert_eq!(inst.target_uid, "123");
        assert!(inst.started_timestamp.is_some());
        assert!(!inst.safe_mode);
        assert!(inst.safe_mode_start_time.is_none());
    }

    #[test]
    fn test_uptime_formatting() {
        let mut inst = Instance::launched("alpha", "123");
        inst.started_timestamp = Some(0);
        let up = inst.uptime(3 * 3_600_000 + 2 * 60_000 + 11_000).unwrap();
        assert_eq!(up, "3h 2m 11s");
    }

    #[test]
    fn test_uptime_none_when_stopped() {
        let mut inst = Instance::launched("alpha", "123");
        inst.status = InstanceStatus::Stopped;
        assert!(inst.uptime(1_000).is_none());
    }

    #[test]
    fn test_uptime_clamps_negative_diff() {
        let mut inst = Instance::launched("alpha", "123");
        inst.started_timestamp = Some(10_000);
        assert_eq!(inst.uptime(0).unwrap(), "0h 0m 0s");
    }

    #[test]
    fn test_percent_complete_prefers_reported() {
        let snap = LevelSnapshot {
            percent: Some(42.5),
            current_metric: Some(50),
            start_metric: Some(0),
            target_metric: Some(100),
            ..Default::default()
        };
        assert_eq!(snap.percent_complete(), 42.5);
    }

    #[test]
    fn test_percent_complete_derived() {
        let snap = LevelSnapshot {
            current_metric: Some(150),
            start_metric: Some(100),
            target_metric: Some(300),
            ..Default::default()
        };
        assert!((snap.percent_complete() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_remaining_prefers_reported() {
        let snap = LevelSnapshot {
            needed_metric: Some(77),
            current_metric: Some(10),
            target_metric: Some(100),
            ..Default::default()
        };
        assert_eq!(snap.remaining(), 77);
    }

    #[test]
    fn test_remaining_derived_and_clamped() {
        let snap = LevelSnapshot {
            current_metric: Some(120),
            target_metric: Some(100),
            ..Default::default()
        };
        assert_eq!(snap.remaining(), 0);
    }
}
