//! Integration tests for netvault-store against real SQLite files.
//!
//! Each test opens a fresh store in its own temporary directory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use netvault_core::{
    Cooldowns, Device, DeviceId, DeviceStatus, EventType, GeoLocation, LocalDevice, Network,
    NetworkId, NetworkStatus, NewEvent, Port, PortState, Protocol, ScanKind, ScanState, Severity,
    StoreConfig, Vulnerability, WebProtocol, WebService,
};
use netvault_store::prelude::*;
use netvault_store::{
    DeviceAnnotations, NetworkMetadata, NewSystemStatus, SettingsPatch, StoreError,
};
use rusqlite::Connection;
use tempfile::TempDir;
use uuid::Uuid;

fn open_store() -> (TempDir, AssetStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = AssetStore::open(&test_config(&dir)).unwrap();
    (dir, store)
}

fn test_config(dir: &TempDir) -> StoreConfig {
    let mut config = StoreConfig::with_path(dir.path().join("data").join("netvault.db"));
    config.pool_size = 4;
    config.min_idle = 1;
    config.busy_timeout_ms = 5_000;
    config
}

fn schema_snapshot(conn: &Connection) -> Vec<(String, String, Option<String>)> {
    let mut stmt = conn
        .prepare("SELECT type, name, sql FROM sqlite_master ORDER BY type, name")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap()
}

fn port(device_id: DeviceId, number: u16, service: &str) -> Port {
    Port {
        device_id,
        number,
        protocol: Protocol::Tcp,
        state: PortState::Open,
        service: service.to_string(),
    }
}

fn cooldowns() -> Cooldowns {
    Cooldowns {
        port_scan: Duration::from_secs(600),
        web_scan: Duration::from_secs(3600),
    }
}

// ── Lifecycle & Schema ────────────────────────────────────────────

#[test]
fn test_open_creates_directory_and_clean_schema() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    assert!(!config.db_path.parent().unwrap().exists());

    let store = AssetStore::open(&config).unwrap();
    assert!(config.db_path.exists());
    assert!(store.schema_report().is_clean());
    assert!(!store.schema_report().applied.is_empty());
    store.close().unwrap();
}

#[test]
fn test_reopen_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let store = AssetStore::open(&config).unwrap();
    let before = store.with_conn(|c| Ok(schema_snapshot(c))).unwrap();
    store.close().unwrap();

    let store = AssetStore::open(&config).unwrap();
    let report = store.schema_report();
    assert!(report.applied.is_empty());
    assert!(report.is_clean());
    let after = store.with_conn(|c| Ok(schema_snapshot(c))).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.pool_size = 0;
    assert!(matches!(
        AssetStore::open(&config),
        Err(StoreError::Invalid(_))
    ));
}

#[test]
fn test_legacy_store_is_upgraded_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::create_dir_all(config.db_path.parent().unwrap()).unwrap();

    let network_id = NetworkId::new();
    let device_id = DeviceId::new();
    {
        let conn = Connection::open(&config.db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE networks (id TEXT PRIMARY KEY, cidr TEXT NOT NULL);
             CREATE TABLE devices (
                id TEXT PRIMARY KEY, name TEXT NOT NULL, ipv4 TEXT NOT NULL, mac TEXT,
                vendor TEXT, status TEXT NOT NULL, network_id TEXT, hostname TEXT,
                created_at TIMESTAMP NOT NULL, updated_at TIMESTAMP NOT NULL,
                last_seen_online_at TIMESTAMP, port_scan_started_at TIMESTAMP,
                port_scan_ended_at TIMESTAMP,
                FOREIGN KEY (network_id) REFERENCES networks(id));
             CREATE UNIQUE INDEX idx_devices_ipv4 ON devices(ipv4);
             ALTER TABLE devices ADD COLUMN comment TEXT;",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO networks (id, cidr) VALUES (?1, '192.168.1.0/24')",
            [network_id.to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO devices (id, name, ipv4, status, network_id, created_at, updated_at, comment)
             VALUES (?1, 'router', '192.168.1.1', 'online', ?2, ?3, ?3, 'core')",
            rusqlite::params![device_id.to_string(), network_id.to_string(), Utc::now()],
        )
        .unwrap();
    }

    let store = AssetStore::open(&config).unwrap();
    let report = store.schema_report();
    assert!(report.is_clean());
    assert!(report
        .already_present
        .contains(&"add_column:devices.comment".to_string()));
    assert!(report
        .applied
        .contains(&"add_column:devices.web_scan_ended_at".to_string()));

    let network = store.get_network(network_id).unwrap().unwrap();
    assert_eq!(network.status, NetworkStatus::Active);
    assert_eq!(network.device_count, 1);
    assert!(network.created_at.is_none());

    let device = store.get_device(device_id).unwrap().unwrap();
    assert_eq!(device.name, "router");
    assert_eq!(device.comment.as_deref(), Some("core"));
    assert!(device.web_scan_ended_at.is_none());
}

// ── Devices ───────────────────────────────────────────────────────

#[test]
fn test_duplicate_ipv4_conflicts_but_same_id_updates() {
    let (_dir, store) = open_store();

    let mut first = Device::new("10.0.0.1", DeviceStatus::Online);
    store.save_device(&first).unwrap();

    let intruder = Device::new("10.0.0.1", DeviceStatus::Online);
    let err = store.save_device(&intruder).unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");
    assert!(!err.is_transient());

    first.status = DeviceStatus::Offline;
    first.hostname = Some("gw.lan".to_string());
    let saved = store.save_device(&first).unwrap();
    assert_eq!(saved.id, first.id);
    assert_eq!(saved.status, DeviceStatus::Offline);
    assert!(saved.updated_at >= first.updated_at);
    assert_eq!(store.list_devices().unwrap().len(), 1);
}

#[test]
fn test_concurrent_discovery_creates_one_device() {
    let (_dir, store) = open_store();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                store.save_device(&Device::new("10.9.9.9", DeviceStatus::Online))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(StoreError::is_conflict));
    assert_eq!(store.list_devices().unwrap().len(), 1);
}

#[test]
fn test_upsert_by_ipv4_merges_into_existing() {
    let (_dir, store) = open_store();

    let mut original = Device::new("10.0.0.5", DeviceStatus::Online);
    original.mac = Some("00:11:22:33:44:55".to_string());
    let original = store.upsert_device_by_ipv4(&original).unwrap();
    store
        .update_device_annotations(
            original.id,
            &DeviceAnnotations {
                name: Some("nas".to_string()),
                comment: Some("backups".to_string()),
            },
        )
        .unwrap();

    let seen = Utc::now();
    let mut rescan = Device::new("10.0.0.5", DeviceStatus::Offline);
    rescan.last_seen_online_at = Some(seen);
    rescan.os.name = Some("Linux".to_string());
    rescan.os.confidence = Some(92);
    rescan.ipv6.addresses = vec!["2001:db8::5".to_string()];
    let merged = store.upsert_device_by_ipv4(&rescan).unwrap();

    assert_eq!(merged.id, original.id);
    assert_eq!(merged.created_at, original.created_at);
    assert_eq!(merged.name, "nas");
    assert_eq!(merged.comment.as_deref(), Some("backups"));
    assert_eq!(merged.mac.as_deref(), Some("00:11:22:33:44:55"));
    assert_eq!(merged.status, DeviceStatus::Offline);
    assert_eq!(merged.last_seen_online_at, Some(seen));
    assert_eq!(merged.os.confidence, Some(92));
    assert_eq!(merged.ipv6.addresses, vec!["2001:db8::5".to_string()]);

    let by_ip = store.get_device_by_ipv4("10.0.0.5").unwrap().unwrap();
    assert_eq!(by_ip, merged);
}

#[test]
fn test_concurrent_upserts_merge_into_one_device() {
    let (_dir, store) = open_store();

    for round in 0..10 {
        let ip = format!("10.8.0.{round}");
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                let ip = ip.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.upsert_device_by_ipv4(&Device::new(&ip, DeviceStatus::Online))
                })
            })
            .collect();

        let devices: Vec<Device> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        assert!(devices.iter().all(|d| d.id == devices[0].id));
    }

    assert_eq!(store.list_devices().unwrap().len(), 10);
}

#[test]
fn test_upsert_new_address_keeps_other_device_intact() {
    let (_dir, store) = open_store();
    let existing = store
        .save_device(&Device::new("10.0.0.20", DeviceStatus::Online))
        .unwrap();

    let mut observed = Device::new("10.0.0.21", DeviceStatus::Online);
    observed.id = existing.id;
    let discovered = store.upsert_device_by_ipv4(&observed).unwrap();

    assert_ne!(discovered.id, existing.id);
    assert_eq!(discovered.ipv4, "10.0.0.21");
    let untouched = store.get_device(existing.id).unwrap().unwrap();
    assert_eq!(untouched.ipv4, "10.0.0.20");
    assert_eq!(store.list_devices().unwrap().len(), 2);
}

#[test]
fn test_legacy_enum_values_are_listed_not_rejected() {
    let (_dir, store) = open_store();
    let network = store
        .upsert_network(&Network::new("10.0.0.0/24").unwrap())
        .unwrap();
    let device = store
        .save_device(&Device::new("10.0.0.30", DeviceStatus::Online))
        .unwrap();
    store
        .add_vulnerability(&Vulnerability {
            id: Uuid::new_v4(),
            device_id: Some(device.id),
            target: "10.0.0.30".to_string(),
            name: "Open resolver".to_string(),
            description: None,
            severity: Some(Severity::High),
            discovered_at: Utc::now(),
        })
        .unwrap();

    store
        .with_conn(|conn| {
            conn.execute_batch(
                "UPDATE devices SET status = 'idle';
                 UPDATE vulnerabilities SET severity = 'severe';
                 UPDATE networks SET status = 'paused';",
            )
            .unwrap();
            Ok(())
        })
        .unwrap();

    let devices = store.list_devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].status, DeviceStatus::Unknown);

    let vulns = store.list_vulnerabilities(device.id).unwrap();
    assert_eq!(vulns[0].severity, Some(Severity::Unknown));

    let network = store.get_network(network.id).unwrap().unwrap();
    assert_eq!(network.status, NetworkStatus::Active);
}

#[test]
fn test_list_devices_in_address_order() {
    let (_dir, store) = open_store();
    let base = Utc::now();

    for (i, ip) in ["invalid", "10.0.0.10", "placeholder", "10.0.0.2", "10.0.0.1"]
        .iter()
        .enumerate()
    {
        let mut device = Device::new(ip, DeviceStatus::Unknown);
        device.created_at = base + TimeDelta::seconds(i as i64);
        store.save_device(&device).unwrap();
    }

    let order: Vec<String> = store
        .list_devices()
        .unwrap()
        .into_iter()
        .map(|d| d.ipv4)
        .collect();
    assert_eq!(
        order,
        vec!["10.0.0.1", "10.0.0.2", "10.0.0.10", "invalid", "placeholder"]
    );
}

#[test]
fn test_unknown_references_are_integrity_errors() {
    let (_dir, store) = open_store();

    let mut device = Device::new("10.0.0.3", DeviceStatus::Online);
    device.network_id = Some(NetworkId::new());
    assert!(matches!(
        store.save_device(&device),
        Err(StoreError::ReferentialIntegrity { .. })
    ));

    let orphan = port(DeviceId::new(), 22, "ssh");
    assert!(matches!(
        store.add_ports(&[orphan]),
        Err(StoreError::ReferentialIntegrity { .. })
    ));
}

#[test]
fn test_delete_device_removes_owned_findings() {
    let (_dir, store) = open_store();
    let device = store
        .save_device(&Device::new("10.0.0.8", DeviceStatus::Online))
        .unwrap();

    store
        .add_ports(&[port(device.id, 22, "ssh"), port(device.id, 443, "https")])
        .unwrap();
    store
        .add_web_service(&WebService {
            device_id: device.id,
            url: "https://10.0.0.8/".to_string(),
            title: Some("Admin".to_string()),
            server: Some("nginx".to_string()),
            status_code: 200,
            content_type: Some("text/html".to_string()),
            size: Some(1024),
            screenshot: None,
            port: 443,
            protocol: WebProtocol::Https,
            scanned_at: Utc::now(),
        })
        .unwrap();
    let vuln = Vulnerability {
        id: Uuid::new_v4(),
        device_id: Some(device.id),
        target: "10.0.0.8".to_string(),
        name: "Weak TLS".to_string(),
        description: None,
        severity: Some(Severity::Medium),
        discovered_at: Utc::now(),
    };
    store.add_vulnerability(&vuln).unwrap();

    store.delete_device(device.id).unwrap();

    assert!(store.get_device(device.id).unwrap().is_none());
    assert!(store.list_ports(device.id).unwrap().is_empty());
    assert!(store.list_web_services(device.id).unwrap().is_empty());
    let kept = store.list_vulnerabilities_for_target("10.0.0.8").unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].device_id, None);

    assert!(matches!(
        store.delete_device(device.id),
        Err(StoreError::NotFound { entity: "device", .. })
    ));
}

// ── Networks ──────────────────────────────────────────────────────

#[test]
fn test_network_lifecycle_and_device_counts() {
    let (_dir, store) = open_store();

    let network = store
        .upsert_network(&Network::new("10.0.0.0/24").unwrap())
        .unwrap();
    assert!(network.created_at.is_some());
    assert_eq!(network.device_count, 0);

    for ip in ["10.0.0.1", "10.0.0.2"] {
        let mut device = Device::new(ip, DeviceStatus::Online);
        device.network_id = Some(network.id);
        store.save_device(&device).unwrap();
    }

    // Counts on read never depend on the cached column.
    assert_eq!(store.get_network(network.id).unwrap().unwrap().device_count, 2);
    let cached: i64 = store
        .with_conn(|c| {
            Ok(c.query_row(
                "SELECT device_count FROM networks WHERE id = ?1",
                [network.id.to_string()],
                |r| r.get(0),
            )
            .unwrap())
        })
        .unwrap();
    assert_eq!(cached, 0);

    assert_eq!(store.recompute_device_counts().unwrap(), 1);
    assert_eq!(store.recompute_device_count(network.id).unwrap(), 2);
    assert_eq!(store.list_devices_in_network(network.id).unwrap().len(), 2);

    store
        .update_network_status(network.id, NetworkStatus::Inactive)
        .unwrap();
    store
        .update_network_metadata(
            network.id,
            &NetworkMetadata {
                name: Some("office".to_string()),
                ..NetworkMetadata::default()
            },
        )
        .unwrap();
    let scanned_at = Utc::now();
    store.mark_network_scanned(network.id, scanned_at).unwrap();

    let updated = store.get_network(network.id).unwrap().unwrap();
    assert_eq!(updated.status, NetworkStatus::Inactive);
    assert_eq!(updated.name.as_deref(), Some("office"));
    assert_eq!(updated.last_scanned_at, Some(scanned_at));
    assert_eq!(updated.created_at, network.created_at);

    store.delete_network(network.id).unwrap();
    assert!(store.get_network(network.id).unwrap().is_none());
    let devices = store.list_devices().unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.network_id.is_none()));

    assert!(matches!(
        store.update_network_status(network.id, NetworkStatus::Active),
        Err(StoreError::NotFound { entity: "network", .. })
    ));
}

#[test]
fn test_network_requires_cidr() {
    let (_dir, store) = open_store();
    let mut network = Network::new("10.1.0.0/16").unwrap();
    network.cidr = "  ".to_string();
    assert!(matches!(
        store.upsert_network(&network),
        Err(StoreError::Invalid(_))
    ));
}

// ── Findings ──────────────────────────────────────────────────────

#[test]
fn test_replace_ports_swaps_full_set() {
    let (_dir, store) = open_store();
    let device = store
        .save_device(&Device::new("10.0.0.20", DeviceStatus::Online))
        .unwrap();

    store
        .add_ports(&[port(device.id, 8080, "http-alt"), port(device.id, 22, "ssh")])
        .unwrap();
    let numbers: Vec<u16> = store
        .list_ports(device.id)
        .unwrap()
        .iter()
        .map(|p| p.number)
        .collect();
    assert_eq!(numbers, vec![22, 8080]);

    let added = store
        .replace_ports(device.id, &[port(device.id, 443, "https")])
        .unwrap();
    assert_eq!(added, 1);
    let ports = store.list_ports(device.id).unwrap();
    assert_eq!(ports, vec![port(device.id, 443, "https")]);

    let stray = port(DeviceId::new(), 80, "http");
    assert!(matches!(
        store.replace_ports(device.id, &[stray]),
        Err(StoreError::Invalid(_))
    ));
    assert_eq!(store.list_ports(device.id).unwrap().len(), 1);
}

#[test]
fn test_port_replacement_without_transaction_exposes_empty_state() {
    let (_dir, store) = open_store();
    let device = store
        .save_device(&Device::new("10.0.0.30", DeviceStatus::Online))
        .unwrap();
    store
        .add_ports(&[port(device.id, 22, "ssh"), port(device.id, 80, "http")])
        .unwrap();

    // Two separate calls: a reader in between sees no ports at all.
    store.delete_ports(device.id).unwrap();
    assert!(store.list_ports(device.id).unwrap().is_empty());
    store.add_ports(&[port(device.id, 443, "https")]).unwrap();
    assert_eq!(store.list_ports(device.id).unwrap().len(), 1);

    // Inside a transaction, readers on other connections keep the committed set.
    store
        .transaction(|tx| {
            tx.delete_ports(device.id)?;
            assert!(tx.list_ports(device.id)?.is_empty());

            let seen_by_reader = store.list_ports(device.id)?;
            assert_eq!(seen_by_reader, vec![port(device.id, 443, "https")]);

            tx.add_ports(&[port(device.id, 22, "ssh"), port(device.id, 8443, "https-alt")])
        })
        .unwrap();
    assert_eq!(store.list_ports(device.id).unwrap().len(), 2);
}

#[test]
fn test_failed_transaction_rolls_back() {
    let (_dir, store) = open_store();

    let result: Result<(), StoreError> = store.transaction(|tx| {
        tx.save_device(&Device::new("10.0.0.40", DeviceStatus::Online))?;
        Err(StoreError::Invalid("abort".to_string()))
    });
    assert!(result.is_err());
    assert!(store.get_device_by_ipv4("10.0.0.40").unwrap().is_none());
}

// ── Events, Settings, System Status ───────────────────────────────

#[test]
fn test_events_are_listed_newest_first_with_filters() {
    let (_dir, store) = open_store();
    let device = store
        .save_device(&Device::new("10.0.0.50", DeviceStatus::Online))
        .unwrap();

    store
        .append_event(&NewEvent::new(EventType::PingSweep, "sweep 10.0.0.0/24"))
        .unwrap();
    store
        .append_event(&NewEvent::new(EventType::DeviceOnline, "10.0.0.50 online").for_device(device.id))
        .unwrap();
    let last = store
        .append_event(
            &NewEvent::new(EventType::PortScanCompleted, "2 open ports").for_device(device.id),
        )
        .unwrap();

    let all = store.list_events(&EventQuery::default()).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, last.id);
    assert_eq!(all[2].event_type, EventType::PingSweep);

    let for_device = store.list_events(&EventQuery::for_device(device.id)).unwrap();
    assert_eq!(for_device.len(), 2);

    let online = store
        .list_events(&EventQuery::for_device(device.id).of_type(EventType::DeviceOnline))
        .unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0].description, "10.0.0.50 online");

    let newest = store.list_events(&EventQuery::default().limit(1)).unwrap();
    assert_eq!(newest, vec![last]);
}

#[test]
fn test_settings_default_then_update() {
    let (_dir, store) = open_store();

    let created = store.get_or_create_settings("admin").unwrap();
    assert!(created.screenshots_enabled);
    let again = store.get_or_create_settings("admin").unwrap();
    assert_eq!(again.id, created.id);

    let updated = store
        .update_settings(
            "admin",
            &SettingsPatch {
                screenshots_enabled: Some(false),
            },
        )
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert!(!updated.screenshots_enabled);
    assert!(updated.updated_at >= created.updated_at);

    assert!(store.get_or_create_settings("").is_err());
}

#[test]
fn test_system_status_snapshots() {
    let (_dir, store) = open_store();
    assert!(store.latest_system_status().unwrap().is_none());

    let network = store
        .upsert_network(&Network::new("192.168.0.0/24").unwrap())
        .unwrap();
    let local = LocalDevice {
        name: "scanner".to_string(),
        ipv4: "192.168.0.10".to_string(),
        mac: Some("de:ad:be:ef:00:01".to_string()),
        vendor: None,
        status: DeviceStatus::Online,
        hostname: Some("scanner.lan".to_string()),
    };
    let first = store
        .record_system_status(&NewSystemStatus {
            network_id: Some(network.id),
            public_ip: Some("203.0.113.7".to_string()),
            local_device: Some(local.clone()),
        })
        .unwrap();

    let latest = store.latest_system_status().unwrap().unwrap();
    assert_eq!(latest, first);
    assert_eq!(latest.local_device, Some(local));

    let bad = store.record_system_status(&NewSystemStatus {
        network_id: Some(NetworkId::new()),
        ..NewSystemStatus::default()
    });
    assert!(matches!(bad, Err(StoreError::ReferentialIntegrity { .. })));
    assert_eq!(store.latest_system_status().unwrap().unwrap().id, first.id);
}

// ── Cooldowns ─────────────────────────────────────────────────────

#[test]
fn test_port_scan_cooldown_cycle() {
    let (_dir, store) = open_store();
    let device = store
        .save_device(&Device::new("10.0.0.60", DeviceStatus::Online))
        .unwrap();
    let start = Utc::now();

    assert!(store
        .is_device_eligible(device.id, ScanKind::Port, &cooldowns(), start)
        .unwrap());

    store.mark_port_scan_started(device.id, start).unwrap();
    assert_eq!(
        store
            .device_scan_state(device.id, ScanKind::Port, &cooldowns(), start)
            .unwrap(),
        ScanState::InProgress
    );
    assert!(!store
        .is_device_eligible(device.id, ScanKind::Port, &cooldowns(), start + TimeDelta::hours(1))
        .unwrap());

    let end = start + TimeDelta::seconds(20);
    store.mark_port_scan_finished(device.id, end).unwrap();
    assert!(!store
        .is_device_eligible(device.id, ScanKind::Port, &cooldowns(), end + TimeDelta::seconds(10))
        .unwrap());
    assert!(store
        .is_device_eligible(device.id, ScanKind::Port, &cooldowns(), end + TimeDelta::seconds(601))
        .unwrap());

    store.mark_web_scan_finished(device.id, end).unwrap();
    let eligible = store
        .eligible_devices(ScanKind::Web, &cooldowns(), end + TimeDelta::seconds(5))
        .unwrap();
    assert!(eligible.is_empty());

    assert!(matches!(
        store.mark_port_scan_started(DeviceId::new(), start),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_reset_cooldowns_makes_everything_eligible() {
    let (_dir, store) = open_store();
    let now = Utc::now();

    for ip in ["10.0.1.1", "10.0.1.2"] {
        let device = store
            .save_device(&Device::new(ip, DeviceStatus::Online))
            .unwrap();
        store.mark_port_scan_started(device.id, now).unwrap();
        store.mark_web_scan_finished(device.id, now).unwrap();
    }
    assert!(store
        .eligible_devices(ScanKind::Port, &cooldowns(), now)
        .unwrap()
        .is_empty());

    let reset = store.reset_cooldowns().unwrap();
    assert_eq!(reset.devices, 2);
    assert!(reset.web_column_present);

    for kind in [ScanKind::Port, ScanKind::Web] {
        assert_eq!(store.eligible_devices(kind, &cooldowns(), now).unwrap().len(), 2);
    }
}

#[test]
fn test_reset_cooldowns_tolerates_missing_web_column() {
    let (_dir, store) = open_store();
    store
        .save_device(&Device::new("10.0.2.1", DeviceStatus::Online))
        .unwrap();
    store
        .with_conn(|c| {
            c.execute_batch("ALTER TABLE devices DROP COLUMN web_scan_ended_at")
                .unwrap();
            Ok(())
        })
        .unwrap();

    let reset = store.reset_cooldowns().unwrap();
    assert_eq!(reset.devices, 1);
    assert!(!reset.web_column_present);
}

// ── Geolocation Cache ─────────────────────────────────────────────

struct CountingProvider {
    calls: AtomicUsize,
    city: &'static str,
}

impl GeoProvider for CountingProvider {
    fn name(&self) -> &str {
        "test-provider"
    }

    fn locate(&self, _ip: &str) -> anyhow::Result<GeoLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeoLocation {
            city: Some(self.city.to_string()),
            country_code: Some("NL".to_string()),
            latitude: Some(52.37),
            longitude: Some(4.89),
            ..GeoLocation::default()
        })
    }
}

struct FailingProvider;

impl GeoProvider for FailingProvider {
    fn name(&self) -> &str {
        "down"
    }

    fn locate(&self, ip: &str) -> anyhow::Result<GeoLocation> {
        anyhow::bail!("no route to geolocation service for {ip}")
    }
}

#[test]
fn test_geo_store_then_lookup_hits_until_expiry() {
    let (_dir, store) = open_store();
    let now = Utc::now();
    let ttl = Duration::from_secs(3600);

    assert_eq!(store.lookup("8.8.8.8", now).unwrap(), GeoLookup::Miss);

    let location = GeoLocation {
        city: Some("Mountain View".to_string()),
        ..GeoLocation::default()
    };
    let stored = store
        .store_location("8.8.8.8", &location, "api", ttl, now)
        .unwrap();
    assert_eq!(stored.expires_at, now + TimeDelta::hours(1));

    let hit = store.lookup("8.8.8.8", now + TimeDelta::minutes(59)).unwrap();
    assert!(hit.is_hit());
    assert_eq!(hit.fresh().unwrap().location, location);

    // Expiry is strict and the row survives until overwritten or purged.
    let expired = store.lookup("8.8.8.8", now + TimeDelta::hours(1)).unwrap();
    assert!(matches!(expired, GeoLookup::Stale(ref e) if e.id == stored.id));
    assert!(expired.fresh().is_none());
}

#[test]
fn test_resolve_location_reuses_fresh_rows() {
    let (_dir, store) = open_store();
    let provider = Arc::new(CountingProvider {
        calls: AtomicUsize::new(0),
        city: "Amsterdam",
    });
    let ttl = Duration::from_secs(600);
    let now = Utc::now();

    let first = store
        .resolve_location("1.1.1.1", provider.as_ref(), ttl, now)
        .unwrap();
    let second = store
        .resolve_location("1.1.1.1", provider.as_ref(), ttl, now + TimeDelta::minutes(5))
        .unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(first.source, "test-provider");

    // An expired row is refreshed in place: same row id, one row per IP.
    let later = now + TimeDelta::minutes(11);
    let refreshed = store
        .resolve_location("1.1.1.1", provider.as_ref(), ttl, later)
        .unwrap();
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(refreshed.id, first.id);
    assert_eq!(refreshed.created_at, first.created_at);
    assert_eq!(refreshed.expires_at, later + TimeDelta::minutes(10));
    let rows: i64 = store
        .with_conn(|c| {
            Ok(c.query_row("SELECT COUNT(*) FROM geolocation_cache", [], |r| r.get(0))
                .unwrap())
        })
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn test_provider_failure_is_reported() {
    let (_dir, store) = open_store();
    let err = store
        .resolve_location("9.9.9.9", &FailingProvider, Duration::from_secs(60), Utc::now())
        .unwrap_err();
    assert!(matches!(err, StoreError::Provider { ref provider, .. } if provider == "down"));
    assert_eq!(store.lookup("9.9.9.9", Utc::now()).unwrap(), GeoLookup::Miss);
}

#[test]
fn test_purge_expired_locations() {
    let (_dir, store) = open_store();
    let now = Utc::now();
    let location = GeoLocation::default();

    store
        .store_location("10.1.1.1", &location, "api", Duration::from_secs(60), now)
        .unwrap();
    store
        .store_location("10.1.1.2", &location, "api", Duration::from_secs(7200), now)
        .unwrap();

    let purged = store
        .purge_expired_locations(now + TimeDelta::minutes(5))
        .unwrap();
    assert_eq!(purged, 1);
    assert_eq!(
        store.lookup("10.1.1.1", now).unwrap(),
        GeoLookup::Miss
    );
    assert!(store.lookup("10.1.1.2", now).unwrap().is_hit());
}
