use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use sqlx::SqlitePool;

use stockbook_db::DbModule;
use stockbook_kernel::{settings::Settings, InitCtx, ModuleRegistry};

use crate::modules::{self, books::routes::BooksState, books::BooksModule};

/// A fully initialized application: pool open, modules started, schema current.
pub struct Application {
    settings: Settings,
    pool: SqlitePool,
    registry: ModuleRegistry,
    books: Arc<BooksModule>,
}

impl Application {
    /// Connect, register modules, run `init`, apply migrations, then `start`.
    pub async fn bootstrap(settings: Settings) -> anyhow::Result<Self> {
        let pool = stockbook_db::connect(&settings.database).await?;

        let mut registry = ModuleRegistry::new();
        registry.register_core(Arc::new(DbModule::new(pool.clone())));
        let books = modules::register_all(&mut registry);

        let ctx = InitCtx {
            settings: &settings,
            db: &pool,
        };
        registry.init_all(&ctx).await?;

        let applied = stockbook_db::apply_migrations(&pool, &registry.collect_migrations())
            .await
            .context("failed to apply migrations")?;
        tracing::info!(applied, "schema up to date");

        registry.start_all(&ctx).await?;

        Ok(Self {
            settings,
            pool,
            registry,
            books,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inventory service and queries.
    pub fn books(&self) -> anyhow::Result<&BooksState> {
        self.books
            .state()
            .context("books module is not initialized")
    }

    pub fn router(&self) -> Router {
        stockbook_http::build_router(&self.registry, &self.settings)
    }

    /// Serve HTTP until Ctrl-C, then stop every module.
    pub async fn serve(self) -> anyhow::Result<()> {
        let served = stockbook_http::start_server(&self.registry, &self.settings, shutdown_signal()).await;
        let stopped = self.shutdown().await;
        served.and(stopped)
    }

    /// Stop custom modules, then core modules (closing the pool).
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.registry.stop_all().await
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
