//! Additive, idempotent schema evolution.
//!
//! The schema is an ordered list of independent steps. Each step checks
//! whether its effect is already present (`sqlite_master`, `pragma_table_info`)
//! before running, so a store created by any earlier version is brought up to
//! date without a versioned log or down-migrations. Failing `Required` steps
//! abort startup; failing `Optional` steps are logged and reported.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateTable {
        table: &'static str,
        ddl: &'static str,
    },
    CreateIndex {
        index: &'static str,
        ddl: &'static str,
    },
    AddColumn {
        table: &'static str,
        column: &'static str,
        decl: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub requirement: Requirement,
    pub step: Step,
}

impl Migration {
    /// Stable name used in logs and the `schema_migrations` ledger.
    pub fn name(&self) -> String {
        match self.step {
            Step::CreateTable { table, .. } => format!("create_table:{table}"),
            Step::CreateIndex { index, .. } => format!("create_index:{index}"),
            Step::AddColumn { table, column, .. } => format!("add_column:{table}.{column}"),
        }
    }
}

/// What `ensure_schema` did.
#[derive(Debug, Default)]
pub struct SchemaReport {
    /// Steps that changed the schema on this run.
    pub applied: Vec<String>,
    /// Steps whose effect was already present.
    pub already_present: Vec<String>,
    /// Non-fatal `StoreError::Schema` failures of optional steps.
    pub warnings: Vec<StoreError>,
}

impl SchemaReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

enum Outcome {
    Applied,
    AlreadyPresent,
}

#[derive(Debug, thiserror::Error)]
enum StepFailure {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("{kind} {name} was not created; another object holds the name")]
    Shadowed {
        kind: &'static str,
        name: &'static str,
    },
}

const fn table(table: &'static str, ddl: &'static str) -> Migration {
    Migration {
        requirement: Requirement::Required,
        step: Step::CreateTable { table, ddl },
    }
}

const fn index(index: &'static str, ddl: &'static str) -> Migration {
    Migration {
        requirement: Requirement::Required,
        step: Step::CreateIndex { index, ddl },
    }
}

const fn column(table: &'static str, column: &'static str, decl: &'static str) -> Migration {
    Migration {
        requirement: Requirement::Optional,
        step: Step::AddColumn {
            table,
            column,
            decl,
        },
    }
}

/// The full logical schema, in application order.
pub const MIGRATIONS: &[Migration] = &[
    table(
        "schema_migrations",
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL
        )",
    ),
    table(
        "networks",
        "CREATE TABLE IF NOT EXISTS networks (
            id TEXT PRIMARY KEY,
            cidr TEXT NOT NULL
        )",
    ),
    table(
        "devices",
        "CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            ipv4 TEXT NOT NULL,
            mac TEXT,
            vendor TEXT,
            status TEXT NOT NULL,
            network_id TEXT,
            hostname TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            last_seen_online_at TIMESTAMP,
            port_scan_started_at TIMESTAMP,
            port_scan_ended_at TIMESTAMP,
            FOREIGN KEY (network_id) REFERENCES networks(id)
        )",
    ),
    index(
        "idx_devices_ipv4",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_devices_ipv4 ON devices(ipv4)",
    ),
    index(
        "idx_devices_mac",
        "CREATE INDEX IF NOT EXISTS idx_devices_mac ON devices(mac)",
    ),
    index(
        "idx_devices_network_id",
        "CREATE INDEX IF NOT EXISTS idx_devices_network_id ON devices(network_id)",
    ),
    table(
        "ports",
        "CREATE TABLE IF NOT EXISTS ports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            number TEXT NOT NULL,
            protocol TEXT NOT NULL,
            state TEXT NOT NULL,
            service TEXT NOT NULL,
            FOREIGN KEY (device_id) REFERENCES devices(id)
        )",
    ),
    index(
        "idx_ports_device_id",
        "CREATE INDEX IF NOT EXISTS idx_ports_device_id ON ports(device_id)",
    ),
    table(
        "event_logs",
        "CREATE TABLE IF NOT EXISTS event_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            description TEXT NOT NULL,
            device_id TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )",
    ),
    index(
        "idx_event_logs_device_id",
        "CREATE INDEX IF NOT EXISTS idx_event_logs_device_id ON event_logs(device_id)",
    ),
    table(
        "system_status",
        "CREATE TABLE IF NOT EXISTS system_status (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            network_id TEXT,
            public_ip TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            FOREIGN KEY (network_id) REFERENCES networks(id)
        )",
    ),
    table(
        "local_devices",
        "CREATE TABLE IF NOT EXISTS local_devices (
            system_status_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            ipv4 TEXT NOT NULL,
            mac TEXT,
            vendor TEXT,
            status TEXT NOT NULL,
            hostname TEXT,
            PRIMARY KEY (system_status_id),
            FOREIGN KEY (system_status_id) REFERENCES system_status(id)
        )",
    ),
    // Device columns added after the first release.
    column("devices", "web_scan_ended_at", "TIMESTAMP"),
    column("devices", "device_type", "TEXT"),
    column("devices", "os_name", "TEXT"),
    column("devices", "os_version", "TEXT"),
    column("devices", "os_family", "TEXT"),
    column("devices", "os_confidence", "INTEGER"),
    column("devices", "comment", "TEXT"),
    column("devices", "ipv6_link_local", "TEXT"),
    column("devices", "ipv6_unique_local", "TEXT"),
    column("devices", "ipv6_global", "TEXT"),
    column("devices", "ipv6_addresses", "TEXT"),
    // Network metadata columns.
    column("networks", "name", "TEXT"),
    column("networks", "description", "TEXT"),
    column("networks", "status", "TEXT DEFAULT 'active'"),
    column("networks", "last_scanned_at", "TIMESTAMP"),
    column("networks", "device_count", "INTEGER DEFAULT 0"),
    column("networks", "created_at", "TIMESTAMP"),
    column("networks", "updated_at", "TIMESTAMP"),
    column("networks", "ipv6_prefix", "TEXT"),
    column("networks", "address_family", "TEXT DEFAULT 'ipv4'"),
    index(
        "idx_devices_ipv6_link_local",
        "CREATE INDEX IF NOT EXISTS idx_devices_ipv6_link_local ON devices(ipv6_link_local)",
    ),
    index(
        "idx_devices_ipv6_unique_local",
        "CREATE INDEX IF NOT EXISTS idx_devices_ipv6_unique_local ON devices(ipv6_unique_local)",
    ),
    index(
        "idx_devices_ipv6_global",
        "CREATE INDEX IF NOT EXISTS idx_devices_ipv6_global ON devices(ipv6_global)",
    ),
    table(
        "web_services",
        "CREATE TABLE IF NOT EXISTS web_services (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT,
            server TEXT,
            status_code INTEGER NOT NULL,
            content_type TEXT,
            size INTEGER,
            screenshot TEXT,
            port INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            scanned_at TIMESTAMP NOT NULL,
            FOREIGN KEY (device_id) REFERENCES devices(id)
        )",
    ),
    index(
        "idx_web_services_device_id",
        "CREATE INDEX IF NOT EXISTS idx_web_services_device_id ON web_services(device_id)",
    ),
    table(
        "geolocation_cache",
        "CREATE TABLE IF NOT EXISTS geolocation_cache (
            id TEXT PRIMARY KEY,
            ip TEXT NOT NULL UNIQUE,
            city TEXT,
            region TEXT,
            country TEXT,
            country_code TEXT,
            latitude REAL,
            longitude REAL,
            timezone TEXT,
            isp TEXT,
            source TEXT NOT NULL DEFAULT 'api',
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            expires_at TIMESTAMP NOT NULL
        )",
    ),
    index(
        "idx_geolocation_cache_ip",
        "CREATE INDEX IF NOT EXISTS idx_geolocation_cache_ip ON geolocation_cache(ip)",
    ),
    index(
        "idx_geolocation_cache_expires_at",
        "CREATE INDEX IF NOT EXISTS idx_geolocation_cache_expires_at ON geolocation_cache(expires_at)",
    ),
    table(
        "vulnerabilities",
        "CREATE TABLE IF NOT EXISTS vulnerabilities (
            id TEXT PRIMARY KEY,
            device_id TEXT,
            target TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            severity TEXT,
            discovered_at TIMESTAMP NOT NULL,
            FOREIGN KEY (device_id) REFERENCES devices(id)
        )",
    ),
    index(
        "idx_vulnerabilities_device_id",
        "CREATE INDEX IF NOT EXISTS idx_vulnerabilities_device_id ON vulnerabilities(device_id)",
    ),
    table(
        "settings",
        "CREATE TABLE IF NOT EXISTS settings (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            screenshots_enabled BOOLEAN NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            UNIQUE(user_id)
        )",
    ),
    index(
        "idx_settings_user_id",
        "CREATE INDEX IF NOT EXISTS idx_settings_user_id ON settings(user_id)",
    ),
];

/// Bring the store to the current logical schema. Safe to run on every start.
pub fn ensure_schema(conn: &Connection) -> Result<SchemaReport> {
    apply_migrations(conn, MIGRATIONS)
}

/// Apply an arbitrary migration list with the same semantics as [`ensure_schema`].
pub fn apply_migrations(conn: &Connection, migrations: &[Migration]) -> Result<SchemaReport> {
    let mut report = SchemaReport::default();

    for migration in migrations {
        let name = migration.name();
        match apply_step(conn, &migration.step) {
            Ok(Outcome::AlreadyPresent) => report.already_present.push(name),
            Ok(Outcome::Applied) => {
                tracing::debug!(step = %name, "Schema step applied");
                record_applied(conn, &name);
                report.applied.push(name);
            }
            Err(e) => match migration.requirement {
                Requirement::Required => {
                    tracing::error!(step = %name, error = %e, "Required schema step failed");
                    return Err(StoreError::Schema {
                        step: name,
                        fatal: true,
                        message: e.to_string(),
                    });
                }
                Requirement::Optional => {
                    tracing::warn!(step = %name, error = %e, "Optional schema step failed, continuing");
                    report.warnings.push(StoreError::Schema {
                        step: name,
                        fatal: false,
                        message: e.to_string(),
                    });
                }
            },
        }
    }

    tracing::info!(
        applied = report.applied.len(),
        already_present = report.already_present.len(),
        warnings = report.warnings.len(),
        "Schema ensured"
    );

    Ok(report)
}

fn apply_step(conn: &Connection, step: &Step) -> std::result::Result<Outcome, StepFailure> {
    match *step {
        Step::CreateTable { table, ddl } => {
            if table_exists(conn, table)? {
                return Ok(Outcome::AlreadyPresent);
            }
            conn.execute_batch(ddl)?;
            // IF NOT EXISTS is silently satisfied by a view of the same name.
            ensure_created(table_exists(conn, table)?, "table", table)?;
            Ok(Outcome::Applied)
        }
        Step::CreateIndex { index, ddl } => {
            if index_exists(conn, index)? {
                return Ok(Outcome::AlreadyPresent);
            }
            conn.execute_batch(ddl)?;
            ensure_created(index_exists(conn, index)?, "index", index)?;
            Ok(Outcome::Applied)
        }
        Step::AddColumn {
            table,
            column,
            decl,
        } => {
            if column_exists(conn, table, column)? {
                return Ok(Outcome::AlreadyPresent);
            }
            conn.execute_batch(&format!(
                "ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" {decl}"
            ))?;
            Ok(Outcome::Applied)
        }
    }
}

fn ensure_created(
    exists: bool,
    kind: &'static str,
    name: &'static str,
) -> std::result::Result<(), StepFailure> {
    if exists {
        Ok(())
    } else {
        Err(StepFailure::Shadowed { kind, name })
    }
}

fn record_applied(conn: &Connection, name: &str) {
    let result = conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
        params![name, Utc::now()],
    );
    if let Err(e) = result {
        tracing::warn!(step = %name, error = %e, "Failed to record schema step");
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    object_exists(conn, "table", table)
}

pub fn index_exists(conn: &Connection, index: &str) -> rusqlite::Result<bool> {
    object_exists(conn, "index", index)
}

fn object_exists(conn: &Connection, kind: &str, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2 COLLATE NOCASE",
        params![kind, name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// Column names are case-insensitive in SQLite, so the check is too.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
        params![table, column],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}
