//! Per-user settings.

use chrono::Utc;
use netvault_core::Settings;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::client::Executor;
use crate::error::{Result, SqliteResultExt, StoreError};
use crate::rows::parsed;

/// Changes to apply to a user's settings. `None` leaves a toggle unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub screenshots_enabled: Option<bool>,
}

pub trait SettingsOps: Executor {
    /// The settings of `user_id`, created with defaults on first access.
    fn get_or_create_settings(&self, user_id: &str) -> Result<Settings> {
        self.with_conn(|conn| get_or_create(conn, user_id))
    }

    fn update_settings(&self, user_id: &str, patch: &SettingsPatch) -> Result<Settings> {
        self.with_conn(|conn| {
            get_or_create(conn, user_id)?;
            conn.execute(
                "UPDATE settings SET
                    screenshots_enabled = COALESCE(?2, screenshots_enabled),
                    updated_at = ?3
                 WHERE user_id = ?1",
                params![user_id, patch.screenshots_enabled, Utc::now()],
            )
            .in_op("update_settings", user_id)?;
            get(conn, user_id)?.ok_or_else(|| not_found(user_id))
        })
    }
}

impl<E: Executor> SettingsOps for E {}

fn get_or_create(conn: &Connection, user_id: &str) -> Result<Settings> {
    if user_id.trim().is_empty() {
        return Err(StoreError::Invalid("settings need a user id".to_string()));
    }

    let now = Utc::now();
    let created = conn
        .execute(
            "INSERT INTO settings (id, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(user_id) DO NOTHING",
            params![Uuid::new_v4().to_string(), user_id, now],
        )
        .in_op("get_or_create_settings", user_id)?;
    if created > 0 {
        tracing::debug!(user_id, "Default settings created");
    }

    get(conn, user_id)?.ok_or_else(|| not_found(user_id))
}

fn get(conn: &Connection, user_id: &str) -> Result<Option<Settings>> {
    conn.query_row(
        "SELECT id, user_id, screenshots_enabled, created_at, updated_at
         FROM settings WHERE user_id = ?1",
        params![user_id],
        settings_from_row,
    )
    .optional()
    .in_op("get_settings", user_id)
}

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<Settings> {
    Ok(Settings {
        id: parsed(row, "id")?,
        user_id: row.get("user_id")?,
        screenshots_enabled: row.get("screenshots_enabled")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn not_found(user_id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "settings",
        key: user_id.to_string(),
    }
}
