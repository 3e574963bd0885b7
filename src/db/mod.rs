mod schema;
pub mod ledger;
pub mod locations;
pub mod samples;
pub mod users;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::time::Duration;

pub use schema::{MIGRATIONS, SCHEMA};
pub use ledger::LedgerEntry;
pub use locations::{Location, LocationChanges, NewLocation};
pub use samples::{AnalyzedSampleFilter, NewSample, TimeSeriesSample};
pub use users::{NewUser, PasswordReset, User, UserChanges};

use crate::config::DatabaseConfig;

/// Storage format for every timestamp column. Second precision, always UTC,
/// so lexical ordering matches chronological ordering.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Pooled SQLite handle. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (creating if needed) the database file described by `config`.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(&config.path).with_init(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update(None, "foreign_keys", true)
        });
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)
            .with_context(|| format!("Failed to open database at {}", config.path.display()))?;

        Ok(Self { pool })
    }

    /// A private in-memory database. Every SQLite memory connection is its
    /// own database, so the pool holds exactly one connection.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.pragma_update(None, "foreign_keys", true));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .context("Failed to open in-memory database")?;
        Ok(Self { pool })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            // Re-running an applied migration fails harmlessly.
            let _ = conn.execute(migration, []);
        }
        Ok(())
    }

    /// Check out a connection for one unit of work. It returns to the pool
    /// when dropped.
    pub fn conn(&self) -> Result<DbConnection> {
        self.pool
            .get()
            .context("Failed to get database connection from pool")
    }
}
