//! Device rows. The IPv4 address is the discovery key and is unique across
//! the store; the unique index is what keeps concurrent discovery workers from
//! creating duplicates.

use chrono::Utc;
use netvault_core::ip_order::sort_devices;
use netvault_core::{Device, DeviceId, Ipv6Addresses, NetworkId, OsFingerprint};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};

use crate::client::Executor;
use crate::error::{Result, SqliteResultExt, StoreError};
use crate::rows::{atomically, lenient, parsed, parsed_opt};

/// Operator-editable fields. `None` leaves a field unchanged; an empty comment clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAnnotations {
    pub name: Option<String>,
    pub comment: Option<String>,
}

pub(crate) const SELECT_DEVICE: &str = "SELECT id, name, ipv4, mac, vendor, hostname, status,
        network_id, device_type, os_name, os_version, os_family, os_confidence,
        ipv6_link_local, ipv6_unique_local, ipv6_global, ipv6_addresses, comment,
        created_at, updated_at, last_seen_online_at,
        port_scan_started_at, port_scan_ended_at, web_scan_ended_at
    FROM devices";

pub trait DeviceOps: Executor {
    /// Insert a device, or update the row with the same id.
    ///
    /// Fails with `Conflict` when the IPv4 address belongs to a different device.
    fn save_device(&self, device: &Device) -> Result<Device> {
        self.with_conn(|conn| {
            write_device(conn, device)?;
            fetch(conn, device.id)
        })
    }

    /// Record a discovery. Inserts when the address is new, otherwise merges
    /// the observation into the existing row and keeps its identity.
    ///
    /// A new address never takes over another device: if `observed.id` is
    /// already used at a different address, the new row gets a fresh id.
    fn upsert_device_by_ipv4(&self, observed: &Device) -> Result<Device> {
        self.with_conn(|conn| {
            atomically(conn, "upsert_device", |conn| {
                match find_by_ipv4(conn, &observed.ipv4)? {
                    None => {
                        let mut discovered = observed.clone();
                        if let Some(holder) = get_device(conn, observed.id)? {
                            tracing::warn!(
                                device_id = %observed.id,
                                held_by = %holder.ipv4,
                                ipv4 = %observed.ipv4,
                                "Device id already in use, assigning a new one"
                            );
                            discovered.id = DeviceId::new();
                        }
                        write_device(conn, &discovered)?;
                        tracing::debug!(ipv4 = %discovered.ipv4, device_id = %discovered.id, "Device discovered");
                        fetch(conn, discovered.id)
                    }
                    Some(existing) => {
                        let merged = merge_observation(existing, observed);
                        write_device(conn, &merged)?;
                        fetch(conn, merged.id)
                    }
                }
            })
        })
    }

    fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        self.with_conn(|conn| get_device(conn, id))
    }

    fn get_device_by_ipv4(&self, ipv4: &str) -> Result<Option<Device>> {
        self.with_conn(|conn| find_by_ipv4(conn, ipv4))
    }

    /// All devices in canonical address order.
    fn list_devices(&self) -> Result<Vec<Device>> {
        self.with_conn(|conn| {
            let mut devices = query_devices(conn, "ORDER BY created_at, id", params![])?;
            sort_devices(&mut devices);
            Ok(devices)
        })
    }

    fn list_devices_in_network(&self, network_id: NetworkId) -> Result<Vec<Device>> {
        self.with_conn(|conn| {
            let key = network_id.to_string();
            let mut devices = query_devices(conn, "WHERE network_id = ?1 ORDER BY created_at, id", params![key])?;
            sort_devices(&mut devices);
            Ok(devices)
        })
    }

    fn update_device_annotations(&self, id: DeviceId, annotations: &DeviceAnnotations) -> Result<Device> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE devices SET
                        name = COALESCE(:name, name),
                        comment = CASE WHEN :comment IS NULL THEN comment
                                       ELSE NULLIF(:comment, '') END,
                        updated_at = :now
                     WHERE id = :id",
                    named_params! {
                        ":id": id.to_string(),
                        ":name": annotations.name,
                        ":comment": annotations.comment,
                        ":now": Utc::now(),
                    },
                )
                .in_op("update_device_annotations", id)?;
            if changed == 0 {
                return Err(not_found(id));
            }
            fetch(conn, id)
        })
    }

    /// Delete a device with its ports and web services. Vulnerabilities are
    /// kept and detached; event history is left untouched.
    fn delete_device(&self, id: DeviceId) -> Result<()> {
        self.with_conn(|conn| {
            atomically(conn, "delete_device", |conn| {
                let key = id.to_string();
                let ports = conn
                    .execute("DELETE FROM ports WHERE device_id = ?1", params![key])
                    .in_op("delete_device", id)?;
                let web = conn
                    .execute("DELETE FROM web_services WHERE device_id = ?1", params![key])
                    .in_op("delete_device", id)?;
                conn.execute(
                    "UPDATE vulnerabilities SET device_id = NULL WHERE device_id = ?1",
                    params![key],
                )
                .in_op("delete_device", id)?;
                let deleted = conn
                    .execute("DELETE FROM devices WHERE id = ?1", params![key])
                    .in_op("delete_device", id)?;
                if deleted == 0 {
                    return Err(not_found(id));
                }

                tracing::info!(device_id = %id, ports, web_services = web, "Device deleted");
                Ok(())
            })
        })
    }
}

impl<E: Executor> DeviceOps for E {}

/// Fold a fresh observation into the stored device. Status, last-seen and
/// fingerprint are replaced; identity, operator annotations and scan
/// bookkeeping are preserved; other fields are only filled in, never erased.
fn merge_observation(mut existing: Device, observed: &Device) -> Device {
    existing.status = observed.status;
    existing.last_seen_online_at = observed.last_seen_online_at.or(existing.last_seen_online_at);
    if !observed.os.is_empty() {
        existing.os = observed.os.clone();
    }
    if !observed.ipv6.is_empty() {
        existing.ipv6 = observed.ipv6.clone();
    }
    existing.mac = observed.mac.clone().or(existing.mac);
    existing.vendor = observed.vendor.clone().or(existing.vendor);
    existing.hostname = observed.hostname.clone().or(existing.hostname);
    existing.device_type = observed.device_type.clone().or(existing.device_type);
    existing.network_id = observed.network_id.or(existing.network_id);
    existing
}

fn write_device(conn: &Connection, device: &Device) -> Result<()> {
    let addresses = if device.ipv6.addresses.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&device.ipv6.addresses)?)
    };

    conn.execute(
        "INSERT INTO devices (id, name, ipv4, mac, vendor, hostname, status, network_id,
                device_type, os_name, os_version, os_family, os_confidence,
                ipv6_link_local, ipv6_unique_local, ipv6_global, ipv6_addresses, comment,
                created_at, updated_at, last_seen_online_at,
                port_scan_started_at, port_scan_ended_at, web_scan_ended_at)
         VALUES (:id, :name, :ipv4, :mac, :vendor, :hostname, :status, :network_id,
                :device_type, :os_name, :os_version, :os_family, :os_confidence,
                :ipv6_link_local, :ipv6_unique_local, :ipv6_global, :ipv6_addresses, :comment,
                :created_at, :now, :last_seen_online_at,
                :port_scan_started_at, :port_scan_ended_at, :web_scan_ended_at)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            ipv4 = excluded.ipv4,
            mac = excluded.mac,
            vendor = excluded.vendor,
            hostname = excluded.hostname,
            status = excluded.status,
            network_id = excluded.network_id,
            device_type = excluded.device_type,
            os_name = excluded.os_name,
            os_version = excluded.os_version,
            os_family = excluded.os_family,
            os_confidence = excluded.os_confidence,
            ipv6_link_local = excluded.ipv6_link_local,
            ipv6_unique_local = excluded.ipv6_unique_local,
            ipv6_global = excluded.ipv6_global,
            ipv6_addresses = excluded.ipv6_addresses,
            comment = excluded.comment,
            updated_at = excluded.updated_at,
            last_seen_online_at = excluded.last_seen_online_at,
            port_scan_started_at = excluded.port_scan_started_at,
            port_scan_ended_at = excluded.port_scan_ended_at,
            web_scan_ended_at = excluded.web_scan_ended_at",
        named_params! {
            ":id": device.id.to_string(),
            ":name": device.name,
            ":ipv4": device.ipv4,
            ":mac": device.mac,
            ":vendor": device.vendor,
            ":hostname": device.hostname,
            ":status": device.status.as_str(),
            ":network_id": device.network_id.map(|id| id.to_string()),
            ":device_type": device.device_type,
            ":os_name": device.os.name,
            ":os_version": device.os.version,
            ":os_family": device.os.family,
            ":os_confidence": device.os.confidence,
            ":ipv6_link_local": device.ipv6.link_local,
            ":ipv6_unique_local": device.ipv6.unique_local,
            ":ipv6_global": device.ipv6.global,
            ":ipv6_addresses": addresses,
            ":comment": device.comment,
            ":created_at": device.created_at,
            ":now": Utc::now(),
            ":last_seen_online_at": device.last_seen_online_at,
            ":port_scan_started_at": device.port_scan_started_at,
            ":port_scan_ended_at": device.port_scan_ended_at,
            ":web_scan_ended_at": device.web_scan_ended_at,
        },
    )
    .in_op("save_device", &device.ipv4)?;
    Ok(())
}

pub(crate) fn get_device(conn: &Connection, id: DeviceId) -> Result<Option<Device>> {
    conn.query_row(
        &format!("{SELECT_DEVICE} WHERE id = ?1"),
        params![id.to_string()],
        device_from_row,
    )
    .optional()
    .in_op("get_device", id)
}

fn find_by_ipv4(conn: &Connection, ipv4: &str) -> Result<Option<Device>> {
    conn.query_row(
        &format!("{SELECT_DEVICE} WHERE ipv4 = ?1"),
        params![ipv4],
        device_from_row,
    )
    .optional()
    .in_op("get_device_by_ipv4", ipv4)
}

fn fetch(conn: &Connection, id: DeviceId) -> Result<Device> {
    get_device(conn, id)?.ok_or_else(|| not_found(id))
}

/// Run `SELECT_DEVICE` with a trailing clause. Listings order by creation first so
/// that the address sort leaves unparseable addresses in a deterministic order.
pub(crate) fn query_devices(
    conn: &Connection,
    clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Device>> {
    let mut stmt = conn
        .prepare(&format!("{SELECT_DEVICE} {clause}"))
        .in_op("list_devices", clause)?;
    let devices = stmt
        .query_map(params, device_from_row)
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .in_op("list_devices", clause)?;
    Ok(devices)
}

pub(crate) fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let confidence: Option<i64> = row.get("os_confidence")?;
    let addresses: Option<String> = row.get("ipv6_addresses")?;

    Ok(Device {
        id: parsed(row, "id")?,
        name: row.get("name")?,
        ipv4: row.get("ipv4")?,
        mac: row.get("mac")?,
        vendor: row.get("vendor")?,
        hostname: row.get("hostname")?,
        status: lenient(row, "status")?,
        network_id: parsed_opt(row, "network_id")?,
        device_type: row.get("device_type")?,
        os: OsFingerprint {
            name: row.get("os_name")?,
            version: row.get("os_version")?,
            family: row.get("os_family")?,
            confidence: confidence.map(|c| c.clamp(0, 100) as u8),
        },
        ipv6: Ipv6Addresses {
            link_local: row.get("ipv6_link_local")?,
            unique_local: row.get("ipv6_unique_local")?,
            global: row.get("ipv6_global")?,
            addresses: addresses.as_deref().map(decode_addresses).unwrap_or_default(),
        },
        comment: row.get("comment")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        last_seen_online_at: row.get("last_seen_online_at")?,
        port_scan_started_at: row.get("port_scan_started_at")?,
        port_scan_ended_at: row.get("port_scan_ended_at")?,
        web_scan_ended_at: row.get("web_scan_ended_at")?,
    })
}

/// Address lists are written as JSON arrays. Older rows may hold a plain
/// comma-separated list instead.
fn decode_addresses(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

fn not_found(id: DeviceId) -> StoreError {
    StoreError::NotFound {
        entity: "device",
        key: id.to_string(),
    }
}
