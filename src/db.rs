use anyhow::Result;
use sqlx::{Pool, Postgres};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str) -> Result<Db> {
    let pool = Pool::<Postgres>::connect(url).await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database ready");
    Ok(pool)
}
