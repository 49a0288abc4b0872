use async_trait::async_trait;
use axum::Router;
use sqlx::SqlitePool;

/// Handles a module receives while the application boots.
pub struct InitCtx<'a> {
    pub settings: &'a crate::settings::Settings,
    pub db: &'a SqlitePool,
}

/// A named, forward-only schema change contributed by a module.
///
/// `up` may hold several statements separated by `;`.
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: &'static str,
    pub up: &'static str,
}

/// Unit of composition for the application.
///
/// Lifecycle order is `init` -> migrations -> `start` -> serve -> `stop`.
#[async_trait]
pub trait Module: Sync + Send {
    /// Unique name, also the mount point `/api/{name}`
    fn name(&self) -> &'static str;

    /// Capture handles from the context; runs before migrations
    async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Routes served under `/api/{name}`; only meaningful after `init`
    fn routes(&self) -> Router {
        Router::new()
    }

    /// OpenAPI fragment (`paths` and `components.schemas`) merged into the served document
    fn openapi(&self) -> Option<serde_json::Value> {
        None
    }

    /// Schema changes, applied once each in the order returned
    fn migrations(&self) -> Vec<Migration> {
        vec![]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release resources on shutdown
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
