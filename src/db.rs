//! Database abstraction over sqlx: one handle, two SQL dialects.
//!
//! All store queries are written once in the `$N` placeholder subset that
//! both drivers accept; the few dialect-specific query shapes (bulk
//! membership predicates) match on [`Db`] directly.

use std::path::Path;

use sqlx::{
    postgres::PgPool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool},
};

use crate::error::StoreError;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Which SQL dialect the configured backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

#[derive(Clone)]
pub(crate) enum Db {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// Central database handle.  Cheap to clone (pools are Arc internally), so
/// several stores for different owners may share one `Database`.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Db,
}

impl Database {
    /// Open (or create) a SQLite database at `db_path` and run all pending
    /// migrations.
    ///
    /// WAL journal mode and foreign-key enforcement are configured at
    /// connection time, not inside a migration: SQLite forbids changing
    /// `journal_mode` inside a transaction and sqlx wraps every migration
    /// in one.
    pub async fn open_sqlite(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::from_sqlite_pool(pool).await
    }

    /// Wrap an existing SQLite pool, running pending migrations.
    pub async fn from_sqlite_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::info!(dialect = "sqlite", "store database ready");
        Ok(Self { inner: Db::Sqlite(pool) })
    }

    /// Connect to a Postgres database and run all pending migrations.
    pub async fn connect_postgres(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url).await?;
        Self::from_postgres_pool(pool).await
    }

    /// Wrap an existing Postgres pool, running pending migrations.
    pub async fn from_postgres_pool(pool: PgPool) -> Result<Self, StoreError> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::info!(dialect = "postgres", "store database ready");
        Ok(Self { inner: Db::Postgres(pool) })
    }

    pub fn dialect(&self) -> Dialect {
        match self.inner {
            Db::Sqlite(_) => Dialect::Sqlite,
            Db::Postgres(_) => Dialect::Postgres,
        }
    }
}

/// Run one query body against whichever pool is configured.  The body is
/// expanded once per driver, so it may only use APIs both drivers share and
/// must evaluate to the same type in both arms.
macro_rules! on_pool {
    ($db:expr, $pool:ident => $body:expr) => {
        match $db {
            $crate::db::Db::Sqlite($pool) => $body,
            $crate::db::Db::Postgres($pool) => $body,
        }
    };
}
pub(crate) use on_pool;
