//! Scan-window bookkeeping on device rows.
//!
//! Workers mark scans as started and finished here; the eligibility rules
//! themselves live in `netvault_core::cooldown` and stay pure.

use chrono::{DateTime, Utc};
use netvault_core::cooldown::{is_eligible, scan_state};
use netvault_core::ip_order::sort_devices;
use netvault_core::{Cooldowns, Device, DeviceId, ScanKind, ScanState};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::client::Executor;
use crate::devices::{get_device, query_devices};
use crate::error::{Result, SqliteResultExt, StoreError};
use crate::rows::atomically;
use crate::schema::column_exists;

/// Outcome of [`CooldownTracker::reset_cooldowns`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CooldownReset {
    pub devices: usize,
    /// False on stores that predate web-scan tracking. There was nothing to clear.
    pub web_column_present: bool,
}

pub trait CooldownTracker: Executor {
    fn mark_port_scan_started(&self, id: DeviceId, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| set_timestamp(conn, id, "port_scan_started_at", at))
    }

    fn mark_port_scan_finished(&self, id: DeviceId, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| set_timestamp(conn, id, "port_scan_ended_at", at))
    }

    fn mark_web_scan_finished(&self, id: DeviceId, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| set_timestamp(conn, id, "web_scan_ended_at", at))
    }

    /// Clear every scan timestamp on every device, making all of them eligible.
    /// Maintenance and test use only.
    fn reset_cooldowns(&self) -> Result<CooldownReset> {
        self.with_conn(|conn| {
            atomically(conn, "reset_cooldowns", |conn| {
                let devices = conn
                    .execute(
                        "UPDATE devices
                         SET port_scan_started_at = NULL, port_scan_ended_at = NULL, updated_at = ?1",
                        params![Utc::now()],
                    )
                    .in_op("reset_cooldowns", "port_scan")?;

                let web_column_present = column_exists(conn, "devices", "web_scan_ended_at")
                    .in_op("reset_cooldowns", "web_scan_ended_at")?;
                if web_column_present {
                    conn.execute("UPDATE devices SET web_scan_ended_at = NULL", [])
                        .in_op("reset_cooldowns", "web_scan")?;
                } else {
                    tracing::debug!("web_scan_ended_at column absent, nothing to reset");
                }

                tracing::info!(devices, web_column_present, "Scan cooldowns reset");
                Ok(CooldownReset {
                    devices,
                    web_column_present,
                })
            })
        })
    }

    fn device_scan_state(
        &self,
        id: DeviceId,
        kind: ScanKind,
        cooldowns: &Cooldowns,
        now: DateTime<Utc>,
    ) -> Result<ScanState> {
        let device = self
            .with_conn(|conn| get_device(conn, id))?
            .ok_or_else(|| not_found(id))?;
        Ok(scan_state(&device, kind, cooldowns, now))
    }

    fn is_device_eligible(
        &self,
        id: DeviceId,
        kind: ScanKind,
        cooldowns: &Cooldowns,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.device_scan_state(id, kind, cooldowns, now)
            .map(ScanState::is_eligible)
    }

    /// Devices that may be scanned for `kind` at `now`, in address order.
    fn eligible_devices(
        &self,
        kind: ScanKind,
        cooldowns: &Cooldowns,
        now: DateTime<Utc>,
    ) -> Result<Vec<Device>> {
        let mut devices = self.with_conn(|conn| query_devices(conn, "ORDER BY created_at, id", params![]))?;
        devices.retain(|d| is_eligible(d, kind, cooldowns, now));
        sort_devices(&mut devices);
        Ok(devices)
    }
}

impl<E: Executor> CooldownTracker for E {}

/// `column` is one of the fixed scan-window columns.
fn set_timestamp(
    conn: &Connection,
    id: DeviceId,
    column: &'static str,
    at: DateTime<Utc>,
) -> Result<()> {
    let changed = conn
        .execute(
            &format!("UPDATE devices SET {column} = ?2, updated_at = ?3 WHERE id = ?1"),
            params![id.to_string(), at, Utc::now()],
        )
        .in_op(column, id)?;
    if changed == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: DeviceId) -> StoreError {
    StoreError::NotFound {
        entity: "device",
        key: id.to_string(),
    }
}
