// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Throughput rate estimation over a rolling window.
//!
//! Telemetry samples arrive irregularly and noisily. Each instance owns a
//! time-bounded deque of `(timestamp, cumulative metric)` samples; the
//! published rate is the slope between the oldest and newest sample in the
//! window, floored to whole units per minute. A negative slope signals a
//! metric reset (e.g. a level rollover), not a real slowdown, so it is
//! discarded and the previously published rate stands.

use std::collections::HashMap;
use std::collections::VecDeque;

use rand::Rng;

use crate::types::LevelSnapshot;

/// Rolling window span. Slightly more than a minute so a full
/// minute-over-minute comparison point is always available.
const WINDOW_MS: i64 = 70_000;

/// Minimum span between the oldest and newest sample before a rate is
/// computed; suppresses division noise on close-together samples.
const MIN_SPAN_MS: i64 = 5_000;

/// One telemetry reading. Ephemeral; held only inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySample {
    /// When the sample was taken, epoch ms.
    pub timestamp_ms: i64,
    /// Cumulative metric value at that time.
    pub metric: i64,
}

/// Rolling sample window for a single instance.
#[derive(Debug, Default)]
pub struct RateWindow {
    samples: VecDeque<TelemetrySample>,
    published: Option<i64>,
}

impl RateWindow {
    /// Fold a new reading into the window and return the currently
    /// published rate in units per minute.
    ///
    /// Negative metrics are ignored entirely. A computed negative rate is
    /// discarded; the previously published rate is retained.
    pub fn observe(&mut self, now_ms: i64, metric: i64) -> Option<i64> {
        if metric < 0 {
            return self.published;
        }

        self.samples.push_back(TelemetrySample {
            timestamp_ms: now_ms,
            metric,
        });

        let cutoff = now_ms - WINDOW_MS;
        while let Some(front) = self.samples.front() {
            if front.timestamp_ms <= cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        if self.samples.len() >= 2
            && let (Some(oldest), Some(newest)) = (self.samples.front(), self.samples.back())
        {
            let span_ms = newest.timestamp_ms - oldest.timestamp_ms;
            let delta = newest.metric - oldest.metric;

            if span_ms > MIN_SPAN_MS {
                let minutes = span_ms as f64 / 60_000.0;
                let rate = (delta as f64 / minutes).floor() as i64;
                if rate >= 0 {
                    self.published = Some(rate);
                }
            }
        }

        self.published
    }

    /// The last published rate, if any.
    pub fn published(&self) -> Option<i64> {
        self.published
    }

    /// Number of samples currently in the window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-instance rate estimation state.
#[derive(Debug, Default)]
pub struct RateEstimator {
    windows: HashMap<String, RateWindow>,
}

impl RateEstimator {
    /// Create an empty estimator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a reading for an instance and return its published rate.
    pub fn observe(&mut self, instance_id: &str, now_ms: i64, metric: i64) -> Option<i64> {
        self.windows
            .entry(instance_id.to_string())
            .or_default()
            .observe(now_ms, metric)
    }

    /// The published rate for an instance, if any.
    pub fn published(&self, instance_id: &str) -> Option<i64> {
        self.windows.get(instance_id).and_then(RateWindow::published)
    }

    /// Number of buffered samples for an instance.
    pub fn sample_count(&self, instance_id: &str) -> usize {
        self.windows.get(instance_id).map_or(0, RateWindow::len)
    }

    /// Drop an instance's window and published rate.
    ///
    /// Called on restart (the cached baseline no longer applies) and on
    /// delete.
    pub fn clear(&mut self, instance_id: &str) {
        self.windows.remove(instance_id);
    }
}

/// Whether to persist the currently published rate onto the instance
/// record. A low-probability sample keeps the write frequency down while
/// still seeding the display after a reload.
pub fn should_persist_rate() -> bool {
    rand::rng().random::<f64>() > 0.8
}

/// Projected minutes until the target metric is reached.
///
/// Undefined when the rate is non-positive or unknown, or when the target
/// is already reached.
pub fn eta_minutes(rate: Option<i64>, current: i64, target: i64) -> Option<f64> {
    let rate = rate?;
    if rate <= 0 || target <= current {
        return None;
    }
    Some((target - current) as f64 / rate as f64)
}

/// Format an ETA for display: "42m" under an hour, "3h 7m" above, "--"
/// when unknown.
pub fn format_eta(minutes: Option<f64>) -> String {
    match minutes {
        None => "--".to_string(),
        Some(mins) => {
            let total = mins.ceil() as i64;
            if total < 60 {
                format!("{}m", total)
            } else {
                format!("{}h {}m", total / 60, total % 60)
            }
        }
    }
}

/// Resolve the ETA to display for a progress snapshot.
///
/// A locally published rate wins: the projection toward the target metric
/// is formatted. Without one, the source-reported `eta` string is passed
/// through. With neither, "--".
pub fn display_eta(rate: Option<i64>, snapshot: &LevelSnapshot) -> String {
    if let (Some(current), Some(target)) = (snapshot.current_metric, snapshot.target_metric)
        && let Some(mins) = eta_minutes(rate, current, target)
    {
        return format_eta(Some(mins));
    }
    match snapshot.eta.as_deref() {
        Some(eta) if !eta.is_empty() => eta.to_string(),
        _ => "--".to_string(),
    }
}
