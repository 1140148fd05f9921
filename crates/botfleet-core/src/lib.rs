// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Botfleet Core - Worker Instance Engine
//!
//! This crate drives a fleet of remote worker instances through loosely
//! specified HTTP endpoints: it starts and stops their jobs, polls their
//! telemetry through a chain of fallback access paths, estimates their
//! throughput over a rolling window, and force-stops safe-mode instances
//! that run past their time budget.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Command Surface                          │
//! │                  (botfleet-ctl, embedders)                   │
//! └──────────────────────────────────────────────────────────────┘
//!                │                                  │
//!                │ commands                         │ reads
//!                ▼                                  ▼
//! ┌───────────────────────┐            ┌─────────────────────────┐
//! │  LifecycleController  │───────────►│    InstanceRegistry     │
//! │  launch/start/stop/   │  mutations │   (shared, lock-guarded)│
//! │  restart/delete       │            └───────────┬─────────────┘
//! └──────────┬────────────┘                        │ snapshots
//!            │ job-control GETs         ┌──────────┴──────────┐
//!            ▼                          ▼                     ▼
//! ┌───────────────────────┐  ┌─────────────────┐  ┌────────────────┐
//! │   Remote Job Hosts    │  │ TelemetryPoller │  │    Watchdog    │
//! └───────────────────────┘  │  + RateEstimator│  │ (safe-mode     │
//!                            └────────┬────────┘  │  budget sweep) │
//!                                     │           └────────────────┘
//!                   fallback chain    ▼
//!                            ┌─────────────────┐
//!                            │ Telemetry Hosts │
//!                            │ (direct + proxies)
//!                            └─────────────────┘
//! ```
//!
//! Every mutation funnels into the write-behind [`persistence`] task,
//! which debounces save intents and flushes session snapshots to SQLite.
//!
//! # Instance Status State Machine
//!
//! ```text
//!            launch
//!              │
//!              ▼
//!         ┌────────┐  stop   ┌─────────┐
//!     ┌──►│ ACTIVE │────────►│ STOPPED │
//!     │   └───┬────┘         └────┬────┘
//!     │       │ restart           │ start
//!     │       ▼                   ▼
//!     │  ┌────────────┐     ┌────────────┐
//!     └──│ RESTARTING │     │ RESTARTING │──┐
//!        └─────┬──────┘     └────────────┘  │
//!              │ call failed                │ call failed
//!              ▼                            ▼
//!          ┌───────┐        ┌──────────┐
//!          │ ERROR │        │ REMOVING │──► (deleted)
//!          └───────┘        └──────────┘
//! ```
//!
//! | Status | Description |
//! |--------|-------------|
//! | `active` | Remote job confirmed running |
//! | `restarting` | A start or restart call is in flight |
//! | `removing` | A stop or delete is in flight; other commands refuse |
//! | `stopped` | Remote job confirmed stopped |
//! | `error` | The last job-control call failed |
//!
//! Transitions the current status forbids are logged no-ops, never
//! panics or errors.
//!
//! # Configuration
//!
//! [`config::CoreConfig::from_env`] reads:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `BOTFLEET_START_URL` | Yes | - | Job start endpoint template |
//! | `BOTFLEET_STOP_URL` | Yes | - | Job stop endpoint template |
//! | `BOTFLEET_BOT_NAME` | No | `default` | Endpoint set name |
//! | `BOTFLEET_MAX_INSTANCES` | No | `1` | Instance limit |
//! | `BOTFLEET_LEVEL_URL` | No | built-in | Progress telemetry template |
//! | `BOTFLEET_PROFILE_URL` | No | built-in | Profile telemetry template |
//! | `BOTFLEET_SAFE_MODE_LIMIT_MINUTES` | No | `60` | Safe-mode budget |
//!
//! Endpoint templates substitute `{target_uid}` (or `{uid}`) with the
//! instance's target id.
//!
//! # Modules
//!
//! - [`config`]: Engine configuration and environment loading
//! - [`endpoint`]: Endpoint templates, cache busting, access-path chains
//! - [`error`]: Error types shared across the engine
//! - [`extract`]: Schema-agnostic value extraction from nested documents
//! - [`lifecycle`]: Instance status transitions and the console log
//! - [`persistence`]: Durable session storage and write-behind saves
//! - [`rate`]: Rolling-window throughput estimation and ETA projection
//! - [`registry`]: The shared instance collection
//! - [`scheduler`]: Periodic tasks and the [`scheduler::FleetEngine`] composition root
//! - [`telemetry`]: Resilient telemetry fetching over fallback chains
//! - [`types`]: Instance, snapshot and log records
//! - [`watchdog`]: Safe-mode time-budget enforcement

#![deny(missing_docs)]

/// Engine configuration and environment loading.
pub mod config;

/// Endpoint template resolution, cache busting and access paths.
pub mod endpoint;

/// Error types for engine operations.
pub mod error;

/// Schema-agnostic extraction from nested telemetry documents.
pub mod extract;

/// Instance lifecycle control and the bounded console log.
pub mod lifecycle;

/// Durable session storage and the write-behind save task.
pub mod persistence;

/// Rolling-window rate estimation and ETA projection.
pub mod rate;

/// The shared instance registry.
pub mod registry;

/// Periodic tasks and engine composition.
pub mod scheduler;

/// Resilient telemetry fetching.
pub mod telemetry;

/// Core record types.
pub mod types;

/// Safe-mode watchdog.
pub mod watchdog;
