//! TTL-keyed cache of IP geolocation results.
//!
//! Rows are keyed by IP and written with upsert semantics, so an expired row
//! is simply overwritten by the next successful lookup. Expired rows are only
//! removed by [`GeoCache::purge_expired_locations`].

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use netvault_core::{GeoCacheEntry, GeoLocation};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::client::Executor;
use crate::error::{Result, SqliteResultExt, StoreError};
use crate::rows::parsed;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoLookup {
    /// Present and unexpired.
    Hit(GeoCacheEntry),
    /// Present but expired. Treat as a miss; the row is overwritten on the next store.
    Stale(GeoCacheEntry),
    Miss,
}

impl GeoLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// The entry, only if it is fresh.
    pub fn fresh(self) -> Option<GeoCacheEntry> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Stale(_) | Self::Miss => None,
        }
    }
}

/// External geolocation service. The store never performs network I/O itself.
pub trait GeoProvider {
    /// Stored as the `source` of every entry this provider produces.
    fn name(&self) -> &str;

    fn locate(&self, ip: &str) -> anyhow::Result<GeoLocation>;
}

pub trait GeoCache: Executor {
    fn lookup(&self, ip: &str, now: DateTime<Utc>) -> Result<GeoLookup> {
        let entry = self.with_conn(|conn| get_entry(conn, ip))?;
        Ok(match entry {
            Some(entry) if entry.is_fresh(now) => GeoLookup::Hit(entry),
            Some(entry) => GeoLookup::Stale(entry),
            None => GeoLookup::Miss,
        })
    }

    /// Write `location` for `ip`, expiring `ttl` after `now`. Overwrites any
    /// previous row for the IP, including its source.
    fn store_location(
        &self,
        ip: &str,
        location: &GeoLocation,
        source: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<GeoCacheEntry> {
        if ip.trim().is_empty() {
            return Err(StoreError::Invalid("geolocation entry needs an IP".to_string()));
        }
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|_| StoreError::Invalid(format!("geolocation TTL {ttl:?} is out of range")))?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| StoreError::Invalid(format!("geolocation TTL {ttl} overflows")))?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO geolocation_cache (id, ip, city, region, country, country_code,
                        latitude, longitude, timezone, isp, source, created_at, updated_at, expires_at)
                 VALUES (:id, :ip, :city, :region, :country, :country_code,
                        :latitude, :longitude, :timezone, :isp, :source, :now, :now, :expires_at)
                 ON CONFLICT(ip) DO UPDATE SET
                    city = excluded.city,
                    region = excluded.region,
                    country = excluded.country,
                    country_code = excluded.country_code,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    timezone = excluded.timezone,
                    isp = excluded.isp,
                    source = excluded.source,
                    updated_at = excluded.updated_at,
                    expires_at = excluded.expires_at",
                named_params! {
                    ":id": Uuid::new_v4().to_string(),
                    ":ip": ip,
                    ":city": location.city,
                    ":region": location.region,
                    ":country": location.country,
                    ":country_code": location.country_code,
                    ":latitude": location.latitude,
                    ":longitude": location.longitude,
                    ":timezone": location.timezone,
                    ":isp": location.isp,
                    ":source": source,
                    ":now": now,
                    ":expires_at": expires_at,
                },
            )
            .in_op("store_location", ip)?;

            get_entry(conn, ip)?.ok_or_else(|| StoreError::NotFound {
                entity: "geolocation",
                key: ip.to_string(),
            })
        })
    }

    /// Serve `ip` from the cache when fresh; otherwise ask `provider` and cache its answer.
    fn resolve_location(
        &self,
        ip: &str,
        provider: &dyn GeoProvider,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<GeoCacheEntry> {
        let previous = match self.lookup(ip, now)? {
            GeoLookup::Hit(entry) => {
                tracing::debug!(ip, "Geolocation cache hit");
                return Ok(entry);
            }
            GeoLookup::Stale(entry) => Some(entry.expires_at),
            GeoLookup::Miss => None,
        };

        tracing::debug!(ip, provider = provider.name(), stale = previous.is_some(), "Geolocation cache miss");
        let location = provider.locate(ip).map_err(|source| StoreError::Provider {
            provider: provider.name().to_string(),
            source,
        })?;

        self.store_location(ip, &location, provider.name(), ttl, now)
    }

    /// Delete rows whose `expires_at` is at or before `now`. Returns the count.
    fn purge_expired_locations(&self, now: DateTime<Utc>) -> Result<usize> {
        let purged = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM geolocation_cache WHERE expires_at <= ?1",
                params![now],
            )
            .in_op("purge_expired_locations", now)
        })?;
        if purged > 0 {
            tracing::info!(purged, "Expired geolocation rows purged");
        }
        Ok(purged)
    }
}

impl<E: Executor> GeoCache for E {}

fn get_entry(conn: &Connection, ip: &str) -> Result<Option<GeoCacheEntry>> {
    conn.query_row(
        "SELECT id, ip, city, region, country, country_code, latitude, longitude,
                timezone, isp, source, created_at, updated_at, expires_at
         FROM geolocation_cache WHERE ip = ?1",
        params![ip],
        entry_from_row,
    )
    .optional()
    .in_op("lookup", ip)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<GeoCacheEntry> {
    Ok(GeoCacheEntry {
        id: parsed(row, "id")?,
        ip: row.get("ip")?,
        location: GeoLocation {
            city: row.get("city")?,
            region: row.get("region")?,
            country: row.get("country")?,
            country_code: row.get("country_code")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            timezone: row.get("timezone")?,
            isp: row.get("isp")?,
        },
        source: row.get("source")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        expires_at: row.get("expires_at")?,
    })
}
