//! Database connection management
//!
//! Builds one connection pool per database (old and new) and probes them.

pub mod queries;

use crate::config::DatabaseConfig;
use crate::error::AppError;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use queries::SERVER_VERSION;
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Which side of the migration a pool talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Old,
    New,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Old => write!(f, "OLD"),
            Side::New => write!(f, "NEW"),
        }
    }
}

/// Connection pools for the old and new databases
pub struct DatabasePools {
    old: Pool,
    new: Pool,
}

impl DatabasePools {
    /// Create both pools and verify each database is reachable
    pub async fn connect(old: &DatabaseConfig, new: &DatabaseConfig) -> Result<Self, AppError> {
        let old_pool = Self::create_pool(old)?;
        Self::probe(&old_pool, Side::Old, old).await?;

        let new_pool = Self::create_pool(new)?;
        Self::probe(&new_pool, Side::New, new).await?;

        Ok(Self {
            old: old_pool,
            new: new_pool,
        })
    }

    /// Create a connection pool with given configuration
    pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
        let ssl_mode = config.ssl_mode();

        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.username.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.ssl_mode = Some(ssl_mode.pool_mode());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        debug!(
            "Creating pool for {} (sslmode={}, tls={})",
            config.display_name(),
            config.sslmode,
            ssl_mode.requires_tls()
        );
        let pool = match ssl_mode.tls_connector()? {
            Some(tls) => cfg.create_pool(Some(Runtime::Tokio1), tls),
            None => cfg.create_pool(Some(Runtime::Tokio1), NoTls),
        };

        pool.map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))
    }

    async fn probe(pool: &Pool, side: Side, config: &DatabaseConfig) -> Result<(), AppError> {
        let client = pool.get().await.map_err(|e| {
            AppError::Connection(format!(
                "{} database {}: {}",
                side,
                config.display_name(),
                e
            ))
        })?;
        let row = client.query_one(SERVER_VERSION, &[]).await?;
        let version: String = row.get(0);
        debug!("{} database server: {}", side, version);
        info!("Connected to {} database {}", side, config.display_name());
        Ok(())
    }

    pub fn pool(&self, side: Side) -> &Pool {
        match side {
            Side::Old => &self.old,
            Side::New => &self.new,
        }
    }
}
