//! netvault-core: Shared types, ordering rules and configuration for the netvault asset store.
//!
//! This crate provides the foundational pieces used by the store and its collaborators:
//! - Asset types (Network, Device, Port, WebService, Vulnerability, ...)
//! - Canonical IP-address ordering for device listings
//! - The per-device scan cooldown state machine
//! - Store configuration

pub mod config;
pub mod cooldown;
pub mod error;
pub mod ip_order;
pub mod types;

pub use config::StoreConfig;
pub use cooldown::{Cooldowns, ScanKind, ScanState};
pub use error::CoreError;
pub use types::*;
