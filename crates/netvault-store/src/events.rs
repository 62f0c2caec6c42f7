//! Append-only event history.

use chrono::Utc;
use netvault_core::{DeviceId, EventLog, EventType, NewEvent};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};

use crate::client::Executor;
use crate::error::{Result, SqliteResultExt};

/// Filter for [`EventOps::list_events`]. The default lists everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub device_id: Option<DeviceId>,
    pub event_type: Option<EventType>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn for_device(device_id: DeviceId) -> Self {
        Self {
            device_id: Some(device_id),
            ..Self::default()
        }
    }

    pub fn of_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

pub trait EventOps: Executor {
    fn append_event(&self, event: &NewEvent) -> Result<EventLog> {
        let now = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO event_logs (type, description, device_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![
                    event.event_type.as_str(),
                    event.description,
                    event.device_id.map(|id| id.to_string()),
                    now,
                ],
            )
            .in_op("append_event", &event.event_type)?;

            Ok(EventLog {
                id: conn.last_insert_rowid(),
                event_type: event.event_type.clone(),
                description: event.description.clone(),
                device_id: event.device_id,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Matching events, newest first.
    fn list_events(&self, query: &EventQuery) -> Result<Vec<EventLog>> {
        let mut sql = String::from(
            "SELECT id, type, description, device_id, created_at, updated_at FROM event_logs",
        );
        let mut filters = Vec::new();
        let mut values = Vec::new();

        if let Some(device_id) = query.device_id {
            values.push(Value::Text(device_id.to_string()));
            filters.push(format!("device_id = ?{}", values.len()));
        }
        if let Some(event_type) = &query.event_type {
            values.push(Value::Text(event_type.as_str().to_string()));
            filters.push(format!("type = ?{}", values.len()));
        }
        if !filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = query.limit {
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).in_op("list_events", &sql)?;
            let events = stmt
                .query_map(params_from_iter(values.iter()), event_from_row)
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .in_op("list_events", &sql)?;
            Ok(events)
        })
    }
}

impl<E: Executor> EventOps for E {}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventLog> {
    Ok(EventLog {
        id: row.get("id")?,
        event_type: EventType::from(row.get::<_, String>("type")?),
        description: row.get("description")?,
        // No foreign key here, so the reference may be anything.
        device_id: row
            .get::<_, Option<String>>("device_id")?
            .and_then(|raw| raw.parse().ok()),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
