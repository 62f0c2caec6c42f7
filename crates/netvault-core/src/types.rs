//! Core domain types for the netvault asset inventory.
//!
//! These types mirror the rows persisted by `netvault-store` and are shared
//! with scan workers and the presentation layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// persisted form is a fixed string per variant.
macro_rules! string_enum {
    ($name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(CoreError::UnknownVariant {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

// ── Identifiers ───────────────────────────────────────────────────

/// Unique identifier for a network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NetworkId(pub Uuid);

impl NetworkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a device. Stable across rescans of the same IPv4.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── Networks ──────────────────────────────────────────────────────

/// A scanned network block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Network {
    pub id: NetworkId,
    pub cidr: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: NetworkStatus,
    pub address_family: AddressFamily,
    pub ipv6_prefix: Option<String>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    /// Number of devices referencing this network. Recomputed on read.
    pub device_count: i64,
    /// Absent on rows written before the timestamp columns existed.
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Network {
    /// Build an active network for a CIDR, deriving its address family.
    pub fn new(cidr: &str) -> Result<Self, CoreError> {
        let family = AddressFamily::of_cidr(cidr)?;
        Ok(Self {
            id: NetworkId::new(),
            cidr: cidr.to_string(),
            name: None,
            description: None,
            status: NetworkStatus::Active,
            address_family: family,
            ipv6_prefix: None,
            last_scanned_at: None,
            device_count: 0,
            created_at: None,
            updated_at: None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    #[default]
    Active,
    Inactive,
}

string_enum!(NetworkStatus, "network status" {
    Active => "active",
    Inactive => "inactive",
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Ipv4,
    Ipv6,
}

string_enum!(AddressFamily, "address family" {
    Ipv4 => "ipv4",
    Ipv6 => "ipv6",
});

impl AddressFamily {
    /// Determine the family of a CIDR block such as `10.0.0.0/24` or `fd00::/64`.
    pub fn of_cidr(cidr: &str) -> Result<Self, CoreError> {
        match cidr.trim().parse::<IpNet>() {
            Ok(IpNet::V4(_)) => Ok(Self::Ipv4),
            Ok(IpNet::V6(_)) => Ok(Self::Ipv6),
            Err(_) => Err(CoreError::InvalidCidr(cidr.to_string())),
        }
    }
}

// ── Devices ───────────────────────────────────────────────────────

/// A host discovered on a network, keyed by its IPv4 address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Unique across all devices. May be malformed during transient discovery states.
    pub ipv4: String,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
    pub status: DeviceStatus,
    pub network_id: Option<NetworkId>,
    pub device_type: Option<String>,
    pub os: OsFingerprint,
    pub ipv6: Ipv6Addresses,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_online_at: Option<DateTime<Utc>>,
    pub port_scan_started_at: Option<DateTime<Utc>>,
    pub port_scan_ended_at: Option<DateTime<Utc>>,
    pub web_scan_ended_at: Option<DateTime<Utc>>,
}

impl Device {
    /// A freshly discovered device, named after its address until something better is known.
    pub fn new(ipv4: &str, status: DeviceStatus) -> Self {
        let now = Utc::now();
        Self {
            id: DeviceId::new(),
            name: ipv4.to_string(),
            ipv4: ipv4.to_string(),
            mac: None,
            vendor: None,
            hostname: None,
            status,
            network_id: None,
            device_type: None,
            os: OsFingerprint::default(),
            ipv6: Ipv6Addresses::default(),
            comment: None,
            created_at: now,
            updated_at: now,
            last_seen_online_at: None,
            port_scan_started_at: None,
            port_scan_ended_at: None,
            web_scan_ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

string_enum!(DeviceStatus, "device status" {
    Online => "online",
    Offline => "offline",
    Unknown => "unknown",
});

/// Operating system fingerprint attached to a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OsFingerprint {
    pub name: Option<String>,
    pub version: Option<String>,
    pub family: Option<String>,
    /// Confidence percentage (0 – 100).
    pub confidence: Option<u8>,
}

impl OsFingerprint {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.version.is_none()
            && self.family.is_none()
            && self.confidence.is_none()
    }
}

/// IPv6 addresses observed for a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ipv6Addresses {
    pub link_local: Option<String>,
    pub unique_local: Option<String>,
    pub global: Option<String>,
    /// Any further addresses, stored as a JSON array.
    pub addresses: Vec<String>,
}

impl Ipv6Addresses {
    pub fn is_empty(&self) -> bool {
        self.link_local.is_none()
            && self.unique_local.is_none()
            && self.global.is_none()
            && self.addresses.is_empty()
    }
}

// ── Findings ──────────────────────────────────────────────────────

/// A port observed on a device. `(device_id, number, protocol)` is the natural key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Port {
    pub device_id: DeviceId,
    pub number: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

string_enum!(Protocol, "protocol" {
    Tcp => "tcp",
    Udp => "udp",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

string_enum!(PortState, "port state" {
    Open => "open",
    Closed => "closed",
    Filtered => "filtered",
});

/// An HTTP(S) endpoint exposed by a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebService {
    pub device_id: DeviceId,
    pub url: String,
    pub title: Option<String>,
    pub server: Option<String>,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub size: Option<i64>,
    /// Reference to a captured screenshot, if screenshots are enabled.
    pub screenshot: Option<String>,
    pub port: u16,
    pub protocol: WebProtocol,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebProtocol {
    Http,
    Https,
}

string_enum!(WebProtocol, "web protocol" {
    Http => "http",
    Https => "https",
});

/// A vulnerability reported by a scanner, tied to a device or a free-form target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vulnerability {
    pub id: Uuid,
    pub device_id: Option<DeviceId>,
    pub target: String,
    pub name: String,
    pub description: Option<String>,
    pub severity: Option<Severity>,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Unknown,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(Severity, "severity" {
    Unknown => "unknown",
    Info => "info",
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

// ── Geolocation ───────────────────────────────────────────────────

/// Location data returned by a geolocation provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeoLocation {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
}

/// A cached geolocation result for one IP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoCacheEntry {
    pub id: Uuid,
    pub ip: String,
    pub location: GeoLocation,
    /// Which provider produced the data (e.g. "api").
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl GeoCacheEntry {
    /// Fresh entries have `expires_at` strictly after `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

// ── Event Log ─────────────────────────────────────────────────────

/// An append-only history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventLog {
    pub id: i64,
    pub event_type: EventType,
    pub description: String,
    pub device_id: Option<DeviceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An event about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: EventType,
    pub description: String,
    pub device_id: Option<DeviceId>,
}

impl NewEvent {
    pub fn new(event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            description: description.into(),
            device_id: None,
        }
    }

    pub fn for_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }
}

/// Kind of event. Unrecognised persisted values round-trip through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PingSweep,
    PortScanStarted,
    PortScanCompleted,
    WebScanCompleted,
    DeviceOnline,
    DeviceIdle,
    DeviceOffline,
    DeviceUpdated,
    LocalIpFound,
    LocalNetworkFound,
    VulnerabilityFound,
    Warning,
    Alert,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PingSweep => "PING_SWEEP",
            Self::PortScanStarted => "PORT_SCAN_STARTED",
            Self::PortScanCompleted => "PORT_SCAN_COMPLETED",
            Self::WebScanCompleted => "WEB_SCAN_COMPLETED",
            Self::DeviceOnline => "DEVICE_ONLINE",
            Self::DeviceIdle => "DEVICE_IDLE",
            Self::DeviceOffline => "DEVICE_OFFLINE",
            Self::DeviceUpdated => "DEVICE_UPDATED",
            Self::LocalIpFound => "LOCAL_IP_FOUND",
            Self::LocalNetworkFound => "LOCAL_NETWORK_FOUND",
            Self::VulnerabilityFound => "VULNERABILITY_FOUND",
            Self::Warning => "WARNING",
            Self::Alert => "ALERT",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PING_SWEEP" => Self::PingSweep,
            "PORT_SCAN_STARTED" => Self::PortScanStarted,
            "PORT_SCAN_COMPLETED" => Self::PortScanCompleted,
            "WEB_SCAN_COMPLETED" => Self::WebScanCompleted,
            "DEVICE_ONLINE" => Self::DeviceOnline,
            "DEVICE_IDLE" => Self::DeviceIdle,
            "DEVICE_OFFLINE" => Self::DeviceOffline,
            "DEVICE_UPDATED" => Self::DeviceUpdated,
            "LOCAL_IP_FOUND" => Self::LocalIpFound,
            "LOCAL_NETWORK_FOUND" => Self::LocalNetworkFound,
            "VULNERABILITY_FOUND" => Self::VulnerabilityFound,
            "WARNING" => Self::Warning,
            "ALERT" => Self::Alert,
            _ => Self::Other(s),
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        match t {
            EventType::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

// ── Host Identity ─────────────────────────────────────────────────

/// Snapshot of this host's own network identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemStatus {
    pub id: i64,
    pub network_id: Option<NetworkId>,
    pub public_ip: Option<String>,
    pub local_device: Option<LocalDevice>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The device the store's host runs on. One per system status row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalDevice {
    pub name: String,
    pub ipv4: String,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub status: DeviceStatus,
    pub hostname: Option<String>,
}

// ── Settings ──────────────────────────────────────────────────────

/// Per-user feature toggles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub id: Uuid,
    pub user_id: String,
    pub screenshots_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
