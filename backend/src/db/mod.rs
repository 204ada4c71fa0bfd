pub mod memory_repository;
pub mod repository;
pub mod repository_sqlx;
pub mod schema;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

/// Connection pool sized for expected concurrency; no long-held transactions").
#[derive(Clone)]
pub struct Db {
    pub pool: AnyPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(25)
            .min_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }
}
