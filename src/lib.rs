pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;

use crate::core::config::{Settings, StoreBackend};
use crate::core::{redis::RedisHandle, state::AppState, telemetry};
use crate::repositories::memory::{CatalogSeed, MemoryStore};
use crate::repositories::postgres::PgStore;
use crate::repositories::store::ProgressionStore;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let store = build_store(&settings).await?;
    let redis = connect_redis(&settings).await;
    let state = AppState::new(settings, store, redis.clone());

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        store = state.settings().progression().store.as_str(),
        "School progression API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let store = build_store(&settings).await?;
    let redis = connect_redis(&settings).await;
    let state = AppState::new(settings, store, redis.clone());

    let result = tasks::scheduler::run(state).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn ProgressionStore>> {
    match settings.progression().store {
        StoreBackend::Postgres => {
            let pool = db::init_pool(settings).await.context("failed to connect to Postgres")?;
            db::run_migrations(&pool).await.context("failed to run migrations")?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Memory => {
            let seed = match &settings.progression().catalog_path {
                Some(path) => CatalogSeed::from_file(path)?,
                None => {
                    tracing::warn!("PROGRESSION_CATALOG_PATH not set; memory store starts empty");
                    CatalogSeed::default()
                }
            };
            tracing::warn!("Using the in-memory progression store; data is lost on restart");
            Ok(Arc::new(MemoryStore::with_catalog(seed)?))
        }
    }
}

async fn connect_redis(settings: &Settings) -> RedisHandle {
    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; continuing without cache");
    } else {
        tracing::info!("Redis connected successfully");
    }
    redis
}
