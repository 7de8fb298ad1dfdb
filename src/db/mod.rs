//! Record store: SQLite connection pool, migrations, and transactions.
//!
//! Single source of truth for tickets, claims, dependency edges, task
//! checklists and the activity log. Every mutating engine operation runs in
//! one [`Tx`]; dropping a `Tx` without committing rolls it back.

pub mod activity;
pub mod claims;
pub mod deps;
pub mod tasks;
pub mod tickets;

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StorageContext};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

/// Database handle. Owns the connection pool.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

/// An open transaction. All writes of one engine operation go through it.
pub struct Tx {
    inner: Transaction<'static, Sqlite>,
}

impl Db {
    /// Open (or create) a database at the given `sqlite:` URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .context("parse database url")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("connect")?;
        Ok(Self { pool })
    }

    /// Create a migrated in-memory database (for testing).
    ///
    /// An in-memory SQLite database lives as long as its connection, so the
    /// pool holds exactly one connection that never idles out.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parse database url")?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("connect")?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("health check")?;
        Ok(())
    }

    /// Begin a transaction.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front. Concurrent writers
    /// queue on the busy timeout and then read what the winner committed,
    /// instead of failing with a stale-snapshot `SQLITE_BUSY` on their
    /// first write.
    pub async fn begin(&self) -> Result<Tx> {
        let inner = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("begin transaction")?;
        Ok(Tx { inner })
    }

    /// The underlying pool, for direct SQL in tests and tooling.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.inner.commit().await.context("commit")
    }

    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.inner
    }
}
