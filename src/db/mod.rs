// [rust] Database layer - row models, runtime-checked queries and the shared pool
pub mod models;
pub mod queries;

pub use models::*;

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::sync::Arc;
use tracing::info;

// [rust] Arc lets every store share one pool across request tasks
pub type Database = Arc<Pool<Postgres>>;

// [business] Connect and bring the schema up to date before serving anything
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<Database, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    // [business] Migrations are embedded at compile time from ./migrations
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied");

    Ok(Arc::new(pool))
}
