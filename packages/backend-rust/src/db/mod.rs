pub mod migrate;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Clone)]
pub struct DatabaseProxy {
    primary_url: String,
    pool: PgPool,
}

impl DatabaseProxy {
    pub async fn from_env() -> Result<Arc<Self>, DbInitError> {
        let primary_url = std::env::var("DATABASE_URL").map_err(|_| DbInitError::Missing {
            key: "DATABASE_URL",
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&primary_url)
            .await
            .map_err(DbInitError::Sqlx)?;

        migrate::run_migrations(&pool).await?;

        Ok(Arc::new(Self { primary_url, pool }))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.primary_url
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error("Missing required env var: {key}")]
    Missing { key: &'static str },
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error(transparent)]
    Migration(#[from] migrate::MigrationError),
}
