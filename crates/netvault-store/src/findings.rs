//! Scanner findings owned by a device: ports, web services and vulnerabilities.
//!
//! Scanners replace a device's full port set every cycle. Calling
//! `delete_ports` and then `add_ports` as two separate operations lets
//! concurrent readers observe the device with no ports in between; use
//! [`FindingOps::replace_ports`] or wrap both calls in
//! [`AssetStore::transaction`](crate::AssetStore::transaction) when that matters.

use netvault_core::{DeviceId, Port, Vulnerability, WebService};
use rusqlite::{named_params, params, Connection, Row};

use crate::client::Executor;
use crate::error::{Result, SqliteResultExt, StoreError};
use crate::rows::{atomically, lenient_opt, parsed, parsed_opt};

pub trait FindingOps: Executor {
    // ── Ports ─────────────────────────────────────────────────────────

    /// Append ports. The batch is applied all-or-nothing.
    fn add_ports(&self, ports: &[Port]) -> Result<usize> {
        self.with_conn(|conn| atomically(conn, "add_ports", |conn| insert_ports(conn, ports)))
    }

    /// Ports of a device, ordered by number then protocol.
    fn list_ports(&self, device_id: DeviceId) -> Result<Vec<Port>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT device_id, number, protocol, state, service FROM ports
                     WHERE device_id = ?1
                     ORDER BY CAST(number AS INTEGER), protocol, id",
                )
                .in_op("list_ports", device_id)?;
            let ports = stmt
                .query_map(params![device_id.to_string()], port_from_row)
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .in_op("list_ports", device_id)?;
            Ok(ports)
        })
    }

    fn delete_ports(&self, device_id: DeviceId) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM ports WHERE device_id = ?1",
                params![device_id.to_string()],
            )
            .in_op("delete_ports", device_id)
        })
    }

    /// Replace the full port set of a device in one step.
    fn replace_ports(&self, device_id: DeviceId, ports: &[Port]) -> Result<usize> {
        if let Some(stray) = ports.iter().find(|p| p.device_id != device_id) {
            return Err(StoreError::Invalid(format!(
                "port {}/{} belongs to device {}, not {}",
                stray.number, stray.protocol, stray.device_id, device_id
            )));
        }

        self.with_conn(|conn| {
            atomically(conn, "replace_ports", |conn| {
                let removed = conn
                    .execute(
                        "DELETE FROM ports WHERE device_id = ?1",
                        params![device_id.to_string()],
                    )
                    .in_op("replace_ports", device_id)?;
                let added = insert_ports(conn, ports)?;
                tracing::debug!(device_id = %device_id, removed, added, "Ports replaced");
                Ok(added)
            })
        })
    }

    // ── Web Services ──────────────────────────────────────────────────

    fn add_web_service(&self, service: &WebService) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO web_services (device_id, url, title, server, status_code,
                        content_type, size, screenshot, port, protocol, scanned_at)
                 VALUES (:device_id, :url, :title, :server, :status_code,
                        :content_type, :size, :screenshot, :port, :protocol, :scanned_at)",
                named_params! {
                    ":device_id": service.device_id.to_string(),
                    ":url": service.url,
                    ":title": service.title,
                    ":server": service.server,
                    ":status_code": service.status_code,
                    ":content_type": service.content_type,
                    ":size": service.size,
                    ":screenshot": service.screenshot,
                    ":port": service.port,
                    ":protocol": service.protocol.as_str(),
                    ":scanned_at": service.scanned_at,
                },
            )
            .in_op("add_web_service", &service.url)?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Web services of a device, most recently scanned first.
    fn list_web_services(&self, device_id: DeviceId) -> Result<Vec<WebService>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT device_id, url, title, server, status_code, content_type, size,
                            screenshot, port, protocol, scanned_at
                     FROM web_services WHERE device_id = ?1
                     ORDER BY scanned_at DESC, id DESC",
                )
                .in_op("list_web_services", device_id)?;
            let services = stmt
                .query_map(params![device_id.to_string()], web_service_from_row)
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .in_op("list_web_services", device_id)?;
            Ok(services)
        })
    }

    fn delete_web_services(&self, device_id: DeviceId) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM web_services WHERE device_id = ?1",
                params![device_id.to_string()],
            )
            .in_op("delete_web_services", device_id)
        })
    }

    // ── Vulnerabilities ───────────────────────────────────────────────

    fn add_vulnerability(&self, vuln: &Vulnerability) -> Result<()> {
        if vuln.target.trim().is_empty() || vuln.name.trim().is_empty() {
            return Err(StoreError::Invalid(format!(
                "vulnerability {} needs a target and a name",
                vuln.id
            )));
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vulnerabilities (id, device_id, target, name, description, severity, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    vuln.id.to_string(),
                    vuln.device_id.map(|id| id.to_string()),
                    vuln.target,
                    vuln.name,
                    vuln.description,
                    vuln.severity.map(|s| s.as_str()),
                    vuln.discovered_at,
                ],
            )
            .in_op("add_vulnerability", vuln.id)?;
            Ok(())
        })
    }

    /// Vulnerabilities of a device, newest first.
    fn list_vulnerabilities(&self, device_id: DeviceId) -> Result<Vec<Vulnerability>> {
        self.with_conn(|conn| {
            query_vulnerabilities(conn, "device_id", &device_id.to_string())
        })
    }

    /// Vulnerabilities recorded against a free-form target (host name, URL, ...).
    fn list_vulnerabilities_for_target(&self, target: &str) -> Result<Vec<Vulnerability>> {
        self.with_conn(|conn| query_vulnerabilities(conn, "target", target))
    }

    fn delete_vulnerabilities(&self, device_id: DeviceId) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM vulnerabilities WHERE device_id = ?1",
                params![device_id.to_string()],
            )
            .in_op("delete_vulnerabilities", device_id)
        })
    }
}

impl<E: Executor> FindingOps for E {}

fn insert_ports(conn: &Connection, ports: &[Port]) -> Result<usize> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO ports (device_id, number, protocol, state, service)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .in_op("add_ports", ports.len())?;

    for port in ports {
        stmt.execute(params![
            port.device_id.to_string(),
            port.number.to_string(),
            port.protocol.as_str(),
            port.state.as_str(),
            port.service,
        ])
        .in_op("add_ports", port.device_id)?;
    }
    Ok(ports.len())
}

/// `column` is one of a fixed set of names, never caller input.
fn query_vulnerabilities(conn: &Connection, column: &'static str, value: &str) -> Result<Vec<Vulnerability>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, device_id, target, name, description, severity, discovered_at
             FROM vulnerabilities WHERE {column} = ?1
             ORDER BY discovered_at DESC, id"
        ))
        .in_op("list_vulnerabilities", value)?;
    let vulns = stmt
        .query_map(params![value], vulnerability_from_row)
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .in_op("list_vulnerabilities", value)?;
    Ok(vulns)
}

fn port_from_row(row: &Row<'_>) -> rusqlite::Result<Port> {
    Ok(Port {
        device_id: parsed(row, "device_id")?,
        number: parsed(row, "number")?,
        protocol: parsed(row, "protocol")?,
        state: parsed(row, "state")?,
        service: row.get("service")?,
    })
}

fn web_service_from_row(row: &Row<'_>) -> rusqlite::Result<WebService> {
    Ok(WebService {
        device_id: parsed(row, "device_id")?,
        url: row.get("url")?,
        title: row.get("title")?,
        server: row.get("server")?,
        status_code: row.get("status_code")?,
        content_type: row.get("content_type")?,
        size: row.get("size")?,
        screenshot: row.get("screenshot")?,
        port: row.get("port")?,
        protocol: parsed(row, "protocol")?,
        scanned_at: row.get("scanned_at")?,
    })
}

fn vulnerability_from_row(row: &Row<'_>) -> rusqlite::Result<Vulnerability> {
    Ok(Vulnerability {
        id: parsed(row, "id")?,
        device_id: parsed_opt(row, "device_id")?,
        target: row.get("target")?,
        name: row.get("name")?,
        description: row.get("description")?,
        severity: lenient_opt(row, "severity")?,
        discovered_at: row.get("discovered_at")?,
    })
}
