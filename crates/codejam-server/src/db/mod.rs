use crate::services::memory::InMemorySessionStore;
use crate::services::session::PgSessionStore;
use crate::services::store::SessionStore;
use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    tracing::info!("Database connection pool initialized");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Postgres when a database URL is configured, otherwise in memory
pub async fn init_store(database_url: Option<&str>) -> Result<Arc<dyn SessionStore>> {
    match database_url {
        Some(url) => {
            let pool = init_pool(url).await?;
            run_migrations(&pool).await?;
            Ok(Arc::new(PgSessionStore::new(pool)))
        }
        None => {
            tracing::info!("Using in-memory session store");
            Ok(Arc::new(InMemorySessionStore::new()))
        }
    }
}
