//! Snapshots of this host's own network identity.

use chrono::Utc;
use netvault_core::{LocalDevice, NetworkId, SystemStatus};
use rusqlite::{params, OptionalExtension, Row};

use crate::client::Executor;
use crate::error::{Result, SqliteResultExt};
use crate::rows::{atomically, parsed, parsed_opt};

/// A status snapshot about to be recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSystemStatus {
    pub network_id: Option<NetworkId>,
    pub public_ip: Option<String>,
    pub local_device: Option<LocalDevice>,
}

pub trait SystemOps: Executor {
    /// Record a status row and its local device together.
    fn record_system_status(&self, status: &NewSystemStatus) -> Result<SystemStatus> {
        let now = Utc::now();
        self.with_conn(|conn| {
            atomically(conn, "record_system_status", |conn| {
                conn.execute(
                    "INSERT INTO system_status (network_id, public_ip, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![
                        status.network_id.map(|id| id.to_string()),
                        status.public_ip,
                        now
                    ],
                )
                .in_op("record_system_status", "system_status")?;
                let id = conn.last_insert_rowid();

                if let Some(local) = &status.local_device {
                    conn.execute(
                        "INSERT INTO local_devices (system_status_id, name, ipv4, mac, vendor, status, hostname)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            id,
                            local.name,
                            local.ipv4,
                            local.mac,
                            local.vendor,
                            local.status.as_str(),
                            local.hostname,
                        ],
                    )
                    .in_op("record_system_status", id)?;
                }

                Ok(SystemStatus {
                    id,
                    network_id: status.network_id,
                    public_ip: status.public_ip.clone(),
                    local_device: status.local_device.clone(),
                    created_at: now,
                    updated_at: now,
                })
            })
        })
    }

    fn latest_system_status(&self) -> Result<Option<SystemStatus>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT s.id, s.network_id, s.public_ip, s.created_at, s.updated_at,
                        l.system_status_id AS local_id, l.name, l.ipv4, l.mac, l.vendor,
                        l.status, l.hostname
                 FROM system_status s
                 LEFT JOIN local_devices l ON l.system_status_id = s.id
                 ORDER BY s.id DESC
                 LIMIT 1",
                [],
                status_from_row,
            )
            .optional()
            .in_op("latest_system_status", "system_status")
        })
    }
}

impl<E: Executor> SystemOps for E {}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<SystemStatus> {
    let local_id: Option<i64> = row.get("local_id")?;
    let local_device = match local_id {
        Some(_) => Some(LocalDevice {
            name: row.get("name")?,
            ipv4: row.get("ipv4")?,
            mac: row.get("mac")?,
            vendor: row.get("vendor")?,
            status: parsed(row, "status")?,
            hostname: row.get("hostname")?,
        }),
        None => None,
    };

    Ok(SystemStatus {
        id: row.get("id")?,
        network_id: parsed_opt(row, "network_id")?,
        public_ip: row.get("public_ip")?,
        local_device,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
