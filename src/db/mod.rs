//! PostgreSQL persistence layer.
//!
//! [`Store`] owns the deadpool connection pool and exposes one method per
//! persisted operation, grouped into entity modules. The relational state is
//! the single source of truth shared by all concurrently running worker
//! instances, so every read-modify-write that affects correctness (step
//! claims, quota increments, lazy counter resets) is a single conditional
//! statement, never a read followed by a separate write.

mod deliveries;
mod history;
mod profiles;
mod questions;
mod states;
mod steps;
mod tasks;
mod tls;
mod users;
mod quotas;

use std::str::FromStr;

use deadpool_postgres::{Object, Pool, PoolConfig};
use secrecy::ExposeSecret;

use crate::config::DatabaseConfig;
use crate::error::StoreError;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Handle to the PostgreSQL store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Create the pool and verify one connection can be established.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut pool_config = deadpool_postgres::Config::new();
        pool_config.url = Some(config.url.expose_secret().to_string());
        pool_config.pool = Some(PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = tls::create_pool(&pool_config, config.ssl_mode)?;

        // Fail fast on a bad URL rather than at first query.
        let _probe = pool.get().await?;

        tracing::info!(
            pool_size = config.pool_size,
            ssl_mode = %config.ssl_mode,
            "connected to postgres"
        );
        Ok(Self { pool })
    }

    /// Apply embedded migrations from `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let client = &mut **conn;
        let report = embedded::migrations::runner().run_async(client).await?;
        let applied = report.applied_migrations().len();
        if applied > 0 {
            tracing::info!(applied, "applied database migrations");
        }
        Ok(())
    }

    /// Liveness probe for /healthz.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    pub(crate) async fn conn(&self) -> Result<Object, StoreError> {
        Ok(self.pool.get().await?)
    }
}

/// Parse a stored enum token, surfacing drift as `CorruptRow`.
pub(crate) fn parse_column<T: FromStr>(
    table: &'static str,
    column: &'static str,
    raw: String,
) -> Result<T, StoreError> {
    match raw.parse::<T>() {
        Ok(value) => Ok(value),
        Err(_) => Err(StoreError::CorruptRow {
            table,
            column,
            value: raw,
        }),
    }
}

/// Same as [`parse_column`] for nullable columns.
pub(crate) fn parse_column_opt<T: FromStr>(
    table: &'static str,
    column: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, StoreError> {
    raw.map(|value| parse_column(table, column, value)).transpose()
}
