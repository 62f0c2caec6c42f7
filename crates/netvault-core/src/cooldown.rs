//! Per-device scan eligibility.
//!
//! Each scan kind moves through `NeverScanned → InProgress → CoolingDown → Eligible`
//! based only on the timestamps stored on the device. Port scans record a start
//! and an end; web scans only record an end, so they are never `InProgress`.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    Port,
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    NeverScanned,
    InProgress,
    CoolingDown,
    Eligible,
}

impl ScanState {
    pub fn is_eligible(self) -> bool {
        matches!(self, Self::NeverScanned | Self::Eligible)
    }
}

/// Cooldown durations per scan kind. Supplied by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldowns {
    pub port_scan: Duration,
    pub web_scan: Duration,
}

impl Cooldowns {
    pub fn for_kind(&self, kind: ScanKind) -> Duration {
        match kind {
            ScanKind::Port => self.port_scan,
            ScanKind::Web => self.web_scan,
        }
    }
}

/// Current scan state of `device` for `kind` at `now`.
pub fn scan_state(
    device: &Device,
    kind: ScanKind,
    cooldowns: &Cooldowns,
    now: DateTime<Utc>,
) -> ScanState {
    let cooldown = cooldowns.for_kind(kind);
    match kind {
        ScanKind::Port => port_state(
            device.port_scan_started_at,
            device.port_scan_ended_at,
            cooldown,
            now,
        ),
        ScanKind::Web => ended_state(device.web_scan_ended_at, cooldown, now),
    }
}

/// Whether `device` may be scanned for `kind` at `now`. Pure.
pub fn is_eligible(
    device: &Device,
    kind: ScanKind,
    cooldowns: &Cooldowns,
    now: DateTime<Utc>,
) -> bool {
    scan_state(device, kind, cooldowns, now).is_eligible()
}

fn port_state(
    started: Option<DateTime<Utc>>,
    ended: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> ScanState {
    match (started, ended) {
        (None, None) => ScanState::NeverScanned,
        (Some(_), None) => ScanState::InProgress,
        // A start newer than the last end is a rescan that has not finished yet.
        (Some(s), Some(e)) if s > e => ScanState::InProgress,
        (_, ended) => ended_state(ended, cooldown, now),
    }
}

fn ended_state(ended: Option<DateTime<Utc>>, cooldown: Duration, now: DateTime<Utc>) -> ScanState {
    let Some(ended) = ended else {
        return ScanState::NeverScanned;
    };
    // Durations beyond chrono's range mean "never cools down".
    let Ok(cooldown) = TimeDelta::from_std(cooldown) else {
        return ScanState::CoolingDown;
    };
    if now - ended >= cooldown {
        ScanState::Eligible
    } else {
        ScanState::CoolingDown
    }
}
