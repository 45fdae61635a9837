use sqlx::{migrate::Migrator, Executor, Pool, SqlitePool};
use tracing::Level;
use tracing_subscriber::{
    fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt,
};

pub mod config;
pub mod fs;
pub mod plot;

pub type DB = sqlx::Sqlite;

pub static MIGRATOR: Migrator = sqlx::migrate!(); // defaults to "./migrations"

pub async fn connect_to_db(database_url: &str) -> anyhow::Result<SqlitePool> {
    let sqlx_options = sqlx::pool::PoolOptions::<DB>::new().after_connect(|conn, _meta| {
        Box::pin(async move {
            let statements = vec![
                "PRAGMA journal_mode = WAL;",
                "PRAGMA synchronous = NORMAL;",
                "PRAGMA busy_timeout = 15000;",
            ];

            for statement in statements {
                conn.execute(statement).await?;
            }

            Ok(())
        })
    });

    let sqlx_pool: Pool<DB> = sqlx_options.connect(database_url).await?;
    MIGRATOR.run(&sqlx_pool).await?;

    Ok(sqlx_pool)
}

pub fn setup_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::Layer::new()
                .with_writer(std::io::stdout.with_max_level(Level::INFO))
                .compact(),
        )
        .init();
}

pub fn none_if_empty(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = sqlx::pool::PoolOptions::<DB>::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    MIGRATOR.run(&pool).await.unwrap();
    pool
}
