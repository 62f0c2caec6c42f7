//! Error types for the netvault-store crate.

use std::fmt::Display;

use rusqlite::ffi;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O, locking or engine failure. Transient; the caller may retry with backoff.
    #[error("Storage error in {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A stored value could not be decoded. Retrying reads the same row again.
    #[error("Undecodable row in {op} ({key}): {source}")]
    Decode {
        op: &'static str,
        key: String,
        #[source]
        source: rusqlite::Error,
    },

    /// No pooled connection became available within the busy timeout.
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A unique constraint was violated. The caller should fall back to an update.
    #[error("Conflict in {op}: {key} already exists")]
    Conflict { op: &'static str, key: String },

    /// A foreign key points at a row that does not exist.
    #[error("Referential integrity violation in {op}: {key}")]
    ReferentialIntegrity { op: &'static str, key: String },

    /// A migration step failed. Fatal failures abort startup.
    #[error("Schema error in step {step} (fatal: {fatal}): {message}")]
    Schema {
        step: String,
        fatal: bool,
        message: String,
    },

    #[error("Not found: {entity} {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Geolocation provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Classify a SQLite failure by its extended result code.
    pub(crate) fn from_sqlite(op: &'static str, key: impl Display, err: rusqlite::Error) -> Self {
        if matches!(
            err,
            rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)
        ) {
            return Self::Decode {
                op,
                key: key.to_string(),
                source: err,
            };
        }
        if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        return Self::Conflict {
                            op,
                            key: key.to_string(),
                        };
                    }
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        return Self::ReferentialIntegrity {
                            op,
                            key: key.to_string(),
                        };
                    }
                    _ => {}
                }
            }
        }
        Self::Storage { op, source: err }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Pool(_) | Self::Io(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_fatal_schema(&self) -> bool {
        matches!(self, Self::Schema { fatal: true, .. })
    }
}

/// Attach operation and key context to raw rusqlite results.
pub(crate) trait SqliteResultExt<T> {
    fn in_op(self, op: &'static str, key: impl Display) -> Result<T>;
}

impl<T> SqliteResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn in_op(self, op: &'static str, key: impl Display) -> Result<T> {
        self.map_err(|e| StoreError::from_sqlite(op, key, e))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Type;

    #[test]
    fn undecodable_values_are_not_transient() {
        let err = StoreError::from_sqlite(
            "list_devices",
            "*",
            rusqlite::Error::InvalidColumnType(6, "status".to_string(), Type::Integer),
        );
        assert!(matches!(err, StoreError::Decode { op: "list_devices", .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn engine_failures_stay_transient() {
        let err = StoreError::from_sqlite(
            "save_device",
            "10.0.0.1",
            rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None),
        );
        assert!(matches!(err, StoreError::Storage { .. }));
        assert!(err.is_transient());
    }
}
