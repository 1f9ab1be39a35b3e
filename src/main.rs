//! Retail Back-Office - catalog, checkout and sales reports over HTTP

use std::sync::Arc;

use anyhow::Result;
use retail_backoffice::api::{self, AppState, SERVICE_NAME};
use retail_backoffice::config::{Config, StorageKind};
use retail_backoffice::domain::events::{EventSink, NatsEventSink};
use retail_backoffice::store::{MemoryStore, PgStore, Tables};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let events: Option<Arc<dyn EventSink>> = match &cfg.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(Arc::new(NatsEventSink::new(client)) as Arc<dyn EventSink>),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, sale events disabled");
                None
            }
        },
        None => None,
    };

    let state = match cfg.storage {
        StorageKind::Postgres => {
            let store = PgStore::connect(&cfg.database_url, cfg.max_connections, Tables::with_suffix(&cfg.table_suffix)).await?;
            tracing::info!("connected to database");
            store.migrate().await?;
            AppState::new(Arc::new(store), cfg.lock_timeout, events)
        }
        StorageKind::Memory => {
            tracing::warn!("using in-memory storage, data is lost on exit");
            AppState::new(Arc::new(MemoryStore::new()), cfg.lock_timeout, events)
        }
    };

    let app = api::router(state);
    tracing::info!("{} listening on 0.0.0.0:{}", SERVICE_NAME, cfg.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", cfg.port)).await?, app).await?;
    Ok(())
}
