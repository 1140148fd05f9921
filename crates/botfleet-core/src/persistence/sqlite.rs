// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed session store.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::{FleetError, Result};
use crate::types::{Instance, InstanceStatus, LogEntry, LogLevel};

use super::SessionStore;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed [`SessionStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. Migrations must already have
    /// been applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file as needed, then
    /// runs migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| FleetError::Store {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| FleetError::Store {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| FleetError::Store {
            operation: "migrate".to_string(),
            details: format!("Failed to run migrations: {}", e),
        })?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl SessionStore for SqliteStore {
    async fn load_instances(&self) -> Result<Vec<Instance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, bot_name, target_uid, status, started_at,
                   started_timestamp, safe_mode, safe_mode_start_time,
                   last_known_rate
            FROM instances
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            instances.push(Instance {
                id: row.try_get("id")?,
                bot_name: row.try_get("bot_name")?,
                target_uid: row.try_get("target_uid")?,
                status: InstanceStatus::parse(&status),
                started_at: row.try_get("started_at")?,
                started_timestamp: row.try_get("started_timestamp")?,
                safe_mode: row.try_get("safe_mode")?,
                safe_mode_start_time: row.try_get("safe_mode_start_time")?,
                last_known_rate: row.try_get("last_known_rate")?,
            });
        }
        Ok(instances)
    }

    async fn save_instances(&self, instances: &[Instance]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM instances")
            .execute(&mut *tx)
            .await?;

        for (position, instance) in instances.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO instances (
                    id, position, bot_name, target_uid, status, started_at,
                    started_timestamp, safe_mode, safe_mode_start_time,
                    last_known_rate
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&instance.id)
            .bind(position as i64)
            .bind(&instance.bot_name)
            .bind(&instance.target_uid)
            .bind(instance.status.as_str())
            .bind(&instance.started_at)
            .bind(instance.started_timestamp)
            .bind(instance.safe_mode)
            .bind(instance.safe_mode_start_time)
            .bind(&instance.last_known_rate)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_log(&self) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, message, level
            FROM console_log
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let level: String = row.try_get("level")?;
            entries.push(LogEntry {
                id: row.try_get("id")?,
                timestamp: row.try_get("timestamp")?,
                message: row.try_get("message")?,
                level: parse_level(&level),
            });
        }
        Ok(entries)
    }

    async fn save_log(&self, entries: &[LogEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM console_log")
            .execute(&mut *tx)
            .await?;

        for (position, entry) in entries.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO console_log (id, position, timestamp, message, level)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(position as i64)
            .bind(&entry.timestamp)
            .bind(&entry.message)
            .bind(level_str(entry.level))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Success => "success",
        LogLevel::Error => "error",
        LogLevel::Warning => "warning",
    }
}

/// Unknown levels degrade to `Info` rather than failing the load.
fn parse_level(value: &str) -> LogLevel {
    match value {
        "success" => LogLevel::Success,
        "error" => LogLevel::Error,
        "warning" => LogLevel::Warning,
        _ => LogLevel::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::from_path(dir.path().join("session.db"))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_empty_store_loads_empty() {
        let (store, _dir) = store().await;
        assert!(store.load_instances().await.unwrap().is_empty());
        assert!(store.load_log().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_instances_survive_reload_in_order() {
        let (store, _dir) = store().await;

        let mut first = Instance::launched("default", "111");
        first.safe_mode = true;
        first.safe_mode_start_time = Some(42);
        first.last_known_rate = Some("600 XP/MIN".to_string());
        let mut second = Instance::launched("default", "222");
        second.status = InstanceStatus::Stopped;
        second.started_timestamp = None;

        store
            .save_instances(&[first.clone(), second.clone()])
            .await
            .unwrap();
        let loaded = store.load_instances().await.unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[0].status, InstanceStatus::Active);
        assert!(loaded[0].safe_mode);
        assert_eq!(loaded[0].safe_mode_start_time, Some(42));
        assert_eq!(loaded[0].last_known_rate.as_deref(), Some("600 XP/MIN"));
        assert_eq!(loaded[1].id, second.id);
        assert_eq!(loaded[1].status, InstanceStatus::Stopped);
        assert_eq!(loaded[1].started_timestamp, None);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let (store, _dir) = store().await;

        let first = Instance::launched("default", "111");
        let second = Instance::launched("default", "222");
        store
            .save_instances(&[first.clone(), second])
            .await
            .unwrap();
        store.save_instances(&[first.clone()]).await.unwrap();

        let loaded = store.load_instances().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, first.id);
    }

    #[tokio::test]
    async fn test_log_round_trip() {
        let (store, _dir) = store().await;

        let entries = vec![
            LogEntry::new("instance started", LogLevel::Success),
            LogEntry::new("something failed", LogLevel::Error),
        ];
        store.save_log(&entries).await.unwrap();

        let loaded = store.load_log().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].message, "instance started");
        assert_eq!(loaded[0].level, LogLevel::Success);
        assert_eq!(loaded[1].level, LogLevel::Error);
    }

    #[test]
    fn test_unknown_level_degrades_to_info() {
        assert_eq!(parse_level("verbose"), LogLevel::Info);
    }
}
