//! Canonical ordering of address strings for device listings.
//!
//! Parseable addresses sort numerically ascending (all IPv4 before IPv6).
//! Anything that fails to parse sorts after every parseable address, and
//! unparseable entries keep their relative input order.

use std::cmp::Ordering;
use std::net::IpAddr;

use crate::types::Device;

/// Sort key for an address string. `Parsed` orders before `Unparsed`;
/// all `Unparsed` keys compare equal so a stable sort preserves their order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressKey {
    Parsed(IpAddr),
    Unparsed,
}

impl AddressKey {
    pub fn of(addr: &str) -> Self {
        match addr.parse::<IpAddr>() {
            Ok(ip) => Self::Parsed(ip),
            Err(_) => Self::Unparsed,
        }
    }
}

/// Total order over address strings.
pub fn compare_addresses(a: &str, b: &str) -> Ordering {
    AddressKey::of(a).cmp(&AddressKey::of(b))
}

/// Stable sort of arbitrary items by an address extracted from each one.
pub fn sort_by_address<T, F>(items: &mut [T], addr: F)
where
    F: Fn(&T) -> &str,
{
    // sort_by_key is stable, which the unparseable tail relies on.
    items.sort_by_key(|item| AddressKey::of(addr(item)));
}

/// Sort devices by their IPv4 address.
pub fn sort_devices(devices: &mut [Device]) {
    sort_by_address(devices, |d| d.ipv4.as_str());
}
