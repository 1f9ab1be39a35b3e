//! Drops and recreates the schema, including the `_test` tables.

use anyhow::Result;
use retail_backoffice::config::Config;
use retail_backoffice::store::{PgStore, Tables};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = PgStore::connect(&cfg.database_url, 1, Tables::with_suffix(&cfg.table_suffix)).await?;
    let test_schema = PgStore::new(store.pool().clone(), Tables::with_suffix("_test"));
    test_schema.drop_tables().await?;
    store.drop_tables().await?;
    store.migrate().await?;

    tracing::info!("database reset completed");
    Ok(())
}
