//! netvault-store: SQLite-backed system of record for the asset inventory.
//!
//! Open an [`AssetStore`] once at startup; it brings the schema up to date
//! before handing out any connection. Operations are grouped into capability
//! traits implemented for every [`Executor`], so they work the same on the
//! pooled store and inside [`AssetStore::transaction`]:
//!
//! ```no_run
//! use netvault_core::{Device, DeviceStatus, StoreConfig};
//! use netvault_store::prelude::*;
//!
//! # fn main() -> netvault_store::Result<()> {
//! let store = AssetStore::open(&StoreConfig::with_path("./data/netvault.db"))?;
//! let device = store.upsert_device_by_ipv4(&Device::new("10.0.0.4", DeviceStatus::Online))?;
//! store.transaction(|tx| {
//!     tx.delete_ports(device.id)?;
//!     tx.add_ports(&[])
//! })?;
//! store.close()
//! # }
//! ```

pub mod client;
pub mod cooldown;
pub mod devices;
pub mod error;
pub mod events;
pub mod findings;
pub mod geo;
pub mod networks;
mod rows;
pub mod schema;
pub mod settings;
pub mod system;

pub use client::{AssetStore, Executor, StoreTx};
pub use cooldown::{CooldownReset, CooldownTracker};
pub use devices::{DeviceAnnotations, DeviceOps};
pub use error::{Result, StoreError};
pub use events::{EventOps, EventQuery};
pub use findings::FindingOps;
pub use geo::{GeoCache, GeoLookup, GeoProvider};
pub use networks::{NetworkMetadata, NetworkOps};
pub use schema::{ensure_schema, SchemaReport};
pub use settings::{SettingsOps, SettingsPatch};
pub use system::{NewSystemStatus, SystemOps};

/// Everything needed to call store operations.
pub mod prelude {
    pub use crate::client::{AssetStore, Executor, StoreTx};
    pub use crate::cooldown::CooldownTracker;
    pub use crate::devices::DeviceOps;
    pub use crate::events::{EventOps, EventQuery};
    pub use crate::findings::FindingOps;
    pub use crate::geo::{GeoCache, GeoLookup, GeoProvider};
    pub use crate::networks::NetworkOps;
    pub use crate::settings::SettingsOps;
    pub use crate::system::SystemOps;
}
