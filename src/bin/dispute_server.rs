//! Tax dispute REST server
//!
//! Uses Postgres when built with `database` and `DATABASE_URL` is set,
//! otherwise an in-memory store.

use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tax_dispute_engine::api::dispute_router;
use tax_dispute_engine::{
    CaseStore, DisputeEngine, EngineConfig, MemoryCaseStore, ReminderDispatcher,
    TracingReminderSink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::from_env().context("reading configuration")?;
    let store = build_store(&config).await?;

    let reminders = ReminderDispatcher::new(Arc::new(TracingReminderSink), config.reminders_enabled);
    let engine = DisputeEngine::new(store).with_reminders(reminders);

    let app = dispute_router(engine)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "tax dispute server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

#[cfg(feature = "database")]
async fn build_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn CaseStore>> {
    use sqlx::postgres::PgPoolOptions;
    use tax_dispute_engine::PgCaseStore;

    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set, using in-memory store");
        return Ok(Arc::new(MemoryCaseStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(url)
        .await
        .context("connecting to Postgres")?;
    let store = PgCaseStore::new(pool);
    store.migrate().await.context("applying schema")?;
    info!("using Postgres case store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "database"))]
async fn build_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn CaseStore>> {
    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but this build has no database support; using in-memory store");
    }
    Ok(Arc::new(MemoryCaseStore::new()))
}
