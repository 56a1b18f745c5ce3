use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

pub type Pool = SqlitePool;

pub async fn pool(database_url: &str) -> Result<Pool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn migrate(database_url: &str) -> Result<()> {
    let pool = pool(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    log::info!("Migrations applied");
    Ok(())
}

pub async fn reset(database_url: &str) -> Result<()> {
    let pool = pool(database_url).await?;
    for table in [
        "episode_progress",
        "enrollments",
        "episodes",
        "courses",
        "sessions",
        "verification_codes",
        "accounts",
        "_sqlx_migrations",
    ] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&pool)
            .await?;
    }
    sqlx::migrate!("./migrations").run(&pool).await?;
    log::info!("Database reset");
    Ok(())
}

pub async fn health(pool: &Pool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Fresh in-memory database with the schema applied.
///
/// A single connection is kept alive for the pool's lifetime, since every
/// SQLite in-memory connection is its own database.
#[cfg(test)]
pub async fn test_pool() -> Result<Pool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
