//! Network rows and the per-network device count.

use chrono::{DateTime, Utc};
use netvault_core::{AddressFamily, Network, NetworkId, NetworkStatus};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};

use crate::client::Executor;
use crate::error::{Result, SqliteResultExt, StoreError};
use crate::rows::{atomically, lenient, parsed};

/// Descriptive fields an operator may edit. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub ipv6_prefix: Option<String>,
}

/// Device counts are always computed from `devices` when reading, so the
/// stored `device_count` column never leaks a stale value to callers.
const SELECT_NETWORK: &str = "SELECT id, cidr, name, description, status, address_family,
        ipv6_prefix, last_scanned_at, created_at, updated_at,
        (SELECT COUNT(*) FROM devices d WHERE d.network_id = networks.id) AS live_device_count
    FROM networks";

pub trait NetworkOps: Executor {
    /// Insert a network or overwrite the existing row with the same id.
    fn upsert_network(&self, network: &Network) -> Result<Network> {
        self.with_conn(|conn| upsert_network(conn, network))
    }

    fn get_network(&self, id: NetworkId) -> Result<Option<Network>> {
        self.with_conn(|conn| get_network(conn, id))
    }

    fn list_networks(&self) -> Result<Vec<Network>> {
        self.with_conn(list_networks)
    }

    fn update_network_status(&self, id: NetworkId, status: NetworkStatus) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE networks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), status.as_str(), Utc::now()],
                )
                .in_op("update_network_status", id)?;
            require_row(changed, id)
        })
    }

    fn update_network_metadata(&self, id: NetworkId, metadata: &NetworkMetadata) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE networks SET
                        name = COALESCE(:name, name),
                        description = COALESCE(:description, description),
                        ipv6_prefix = COALESCE(:ipv6_prefix, ipv6_prefix),
                        updated_at = :now
                     WHERE id = :id",
                    named_params! {
                        ":id": id.to_string(),
                        ":name": metadata.name,
                        ":description": metadata.description,
                        ":ipv6_prefix": metadata.ipv6_prefix,
                        ":now": Utc::now(),
                    },
                )
                .in_op("update_network_metadata", id)?;
            require_row(changed, id)
        })
    }

    fn mark_network_scanned(&self, id: NetworkId, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE networks SET last_scanned_at = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), at, Utc::now()],
                )
                .in_op("mark_network_scanned", id)?;
            require_row(changed, id)
        })
    }

    /// Rewrite the cached `device_count` column of one network. Returns the count.
    fn recompute_device_count(&self, id: NetworkId) -> Result<i64> {
        self.with_conn(|conn| {
            let count: Option<i64> = conn
                .query_row(
                    "UPDATE networks
                     SET device_count = (SELECT COUNT(*) FROM devices WHERE network_id = networks.id)
                     WHERE id = ?1
                     RETURNING device_count",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .in_op("recompute_device_count", id)?;
            count.ok_or_else(|| not_found(id))
        })
    }

    /// Rewrite the cached `device_count` column of every network. Returns the number of networks.
    fn recompute_device_counts(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn
                .execute(
                    "UPDATE networks
                     SET device_count = (SELECT COUNT(*) FROM devices WHERE network_id = networks.id)",
                    [],
                )
                .in_op("recompute_device_counts", "*")?;
            tracing::debug!(networks = updated, "Recomputed network device counts");
            Ok(updated)
        })
    }

    /// Delete a network. Devices and status snapshots that referenced it are detached.
    fn delete_network(&self, id: NetworkId) -> Result<()> {
        self.with_conn(|conn| {
            atomically(conn, "delete_network", |conn| {
                let key = id.to_string();
                let detached = conn
                    .execute(
                        "UPDATE devices SET network_id = NULL, updated_at = ?2 WHERE network_id = ?1",
                        params![key, Utc::now()],
                    )
                    .in_op("delete_network", id)?;
                conn.execute(
                    "UPDATE system_status SET network_id = NULL WHERE network_id = ?1",
                    params![key],
                )
                .in_op("delete_network", id)?;
                let deleted = conn
                    .execute("DELETE FROM networks WHERE id = ?1", params![key])
                    .in_op("delete_network", id)?;
                require_row(deleted, id)?;

                tracing::info!(network_id = %id, detached_devices = detached, "Network deleted");
                Ok(())
            })
        })
    }
}

impl<E: Executor> NetworkOps for E {}

fn upsert_network(conn: &Connection, network: &Network) -> Result<Network> {
    if network.cidr.trim().is_empty() {
        return Err(StoreError::Invalid(format!(
            "network {} has an empty CIDR",
            network.id
        )));
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO networks (id, cidr, name, description, status, address_family,
                ipv6_prefix, last_scanned_at, device_count, created_at, updated_at)
         VALUES (:id, :cidr, :name, :description, :status, :family,
                :ipv6_prefix, :last_scanned_at, 0, :created_at, :now)
         ON CONFLICT(id) DO UPDATE SET
            cidr = excluded.cidr,
            name = excluded.name,
            description = excluded.description,
            status = excluded.status,
            address_family = excluded.address_family,
            ipv6_prefix = excluded.ipv6_prefix,
            last_scanned_at = COALESCE(excluded.last_scanned_at, networks.last_scanned_at),
            created_at = COALESCE(networks.created_at, excluded.created_at),
            updated_at = excluded.updated_at",
        named_params! {
            ":id": network.id.to_string(),
            ":cidr": network.cidr,
            ":name": network.name,
            ":description": network.description,
            ":status": network.status.as_str(),
            ":family": network.address_family.as_str(),
            ":ipv6_prefix": network.ipv6_prefix,
            ":last_scanned_at": network.last_scanned_at,
            ":created_at": network.created_at.unwrap_or(now),
            ":now": now,
        },
    )
    .in_op("upsert_network", network.id)?;

    get_network(conn, network.id)?.ok_or_else(|| not_found(network.id))
}

pub(crate) fn get_network(conn: &Connection, id: NetworkId) -> Result<Option<Network>> {
    conn.query_row(
        &format!("{SELECT_NETWORK} WHERE id = ?1"),
        params![id.to_string()],
        network_from_row,
    )
    .optional()
    .in_op("get_network", id)
}

fn list_networks(conn: &Connection) -> Result<Vec<Network>> {
    let mut stmt = conn
        .prepare(&format!("{SELECT_NETWORK} ORDER BY cidr, id"))
        .in_op("list_networks", "*")?;
    let networks = stmt
        .query_map([], network_from_row)
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .in_op("list_networks", "*")?;
    Ok(networks)
}

fn network_from_row(row: &Row<'_>) -> rusqlite::Result<Network> {
    Ok(Network {
        id: parsed(row, "id")?,
        cidr: row.get("cidr")?,
        name: row.get("name")?,
        description: row.get("description")?,
        // Older rows may hold NULL or states this version does not know.
        status: lenient::<NetworkStatus>(row, "status")?,
        address_family: lenient::<AddressFamily>(row, "address_family")?,
        ipv6_prefix: row.get("ipv6_prefix")?,
        last_scanned_at: row.get("last_scanned_at")?,
        device_count: row.get("live_device_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn require_row(changed: usize, id: NetworkId) -> Result<()> {
    if changed == 0 {
        Err(not_found(id))
    } else {
        Ok(())
    }
}

fn not_found(id: NetworkId) -> StoreError {
    StoreError::NotFound {
        entity: "network",
        key: id.to_string(),
    }
}
