//! Connection pooling and the store handle.

use std::sync::Arc;
use std::time::Duration;

use netvault_core::StoreConfig;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, TransactionBehavior};

use crate::error::{Result, SqliteResultExt, StoreError};
use crate::schema::{self, SchemaReport};

/// Anything that can run statements: the pooled store or an open transaction.
///
/// All capability traits (`DeviceOps`, `GeoCache`, ...) are implemented for
/// every `Executor`, so the same calls work inside and outside a transaction.
pub trait Executor {
    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>;
}

/// Handle to an open asset store.
///
/// Clone is cheap (inner Arc). Open once at startup and pass the handle to
/// every collaborator.
#[derive(Clone)]
pub struct AssetStore {
    pool: Pool<SqliteConnectionManager>,
    config: Arc<StoreConfig>,
    schema: Arc<SchemaReport>,
}

impl AssetStore {
    /// Open the data file, bring its schema up to date and start serving.
    ///
    /// No connection is handed out before the schema has been ensured.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        if let Some(dir) = config.db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let busy_timeout = config.busy_timeout();
        let manager = SqliteConnectionManager::file(&config.db_path)
            .with_init(move |conn| configure_connection(conn, busy_timeout));

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(busy_timeout)
            .max_lifetime(config.connection_max_lifetime())
            .build(manager)?;

        let report = {
            let conn = pool.get()?;
            schema::ensure_schema(&conn)?
        };

        tracing::info!(
            path = %config.db_path.display(),
            pool_size = config.pool_size,
            schema_warnings = report.warnings.len(),
            "Asset store opened"
        );

        Ok(Self {
            pool,
            config: Arc::new(config.clone()),
            schema: Arc::new(report),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Outcome of the schema pass run by [`AssetStore::open`].
    pub fn schema_report(&self) -> &SchemaReport {
        &self.schema
    }

    /// Run `f` inside one IMMEDIATE transaction. Commits if `f` returns `Ok`,
    /// rolls back otherwise.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let mut conn = self.checkout()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .in_op("begin_transaction", "immediate")?;
        let store_tx = StoreTx { tx };

        let value = f(&store_tx)?;
        store_tx.tx.commit().in_op("commit", "immediate")?;
        Ok(value)
    }

    /// Checkpoint the write-ahead log and release every pooled connection.
    pub fn close(self) -> Result<()> {
        let (busy, log, checkpointed) = self.with_conn(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .in_op("close", "wal_checkpoint")
        })?;

        tracing::info!(
            path = %self.config.db_path.display(),
            busy,
            log,
            checkpointed,
            "Asset store closed"
        );
        Ok(())
    }

    fn checkout(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

impl Executor for AssetStore {
    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.checkout()?;
        f(&conn)
    }
}

/// An open transaction. Obtained from [`AssetStore::transaction`].
pub struct StoreTx<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl Executor for StoreTx<'_> {
    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        f(&self.tx)
    }
}

/// Per-connection settings. Runs for every connection the pool opens.
fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = 10000;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;
         PRAGMA mmap_size = 268435456;",
    )
}
