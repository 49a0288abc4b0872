//! Book inventory: entity store, inventory service, query facade, and routes.

pub mod error;
pub mod models;
pub mod queries;
pub mod routes;
pub mod service;
pub mod store;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use once_cell::sync::OnceCell;
use serde_json::json;
use stockbook_kernel::{InitCtx, Migration, Module};

use queries::BookQueries;
use routes::BooksState;
use service::{InventoryPolicy, InventoryService};
use store::{BookStore, SqliteBookStore};

/// Books module; its handles are built during `init` from the shared pool.
pub struct BooksModule {
    state: OnceCell<BooksState>,
}

impl BooksModule {
    pub const fn new() -> Self {
        Self {
            state: OnceCell::new(),
        }
    }

    /// Service and query handles, available once the module is initialized.
    pub fn state(&self) -> Option<&BooksState> {
        self.state.get()
    }
}

impl Default for BooksModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let policy = InventoryPolicy::try_from(&ctx.settings.inventory)
            .context("invalid inventory settings")?;
        let store: Arc<dyn BookStore> = Arc::new(SqliteBookStore::new(ctx.db.clone()));

        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            time_zone = %policy.time_zone,
            allow_negative_stock = policy.allow_negative_stock,
            "books module initialized"
        );

        let state = BooksState {
            service: InventoryService::new(store.clone(), policy),
            queries: BookQueries::new(store),
        };
        self.state
            .set(state)
            .map_err(|_| anyhow::anyhow!("books module initialized twice"))
    }

    fn routes(&self) -> Router {
        match self.state.get() {
            Some(state) => routes::router(state.clone()),
            None => {
                tracing::warn!(module = self.name(), "routes requested before init");
                Router::new()
            }
        }
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_init",
            up: store::SCHEMA,
        }]
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi_fragment())
    }
}

/// Create a new instance of the books module
pub fn create_module() -> Arc<BooksModule> {
    Arc::new(BooksModule::new())
}

fn openapi_fragment() -> serde_json::Value {
    let error = |description: &str| {
        json!({
            "description": description,
            "content": { "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            } }
        })
    };
    let ok_json = |description: &str, schema: serde_json::Value| {
        json!({
            "description": description,
            "content": { "application/json": { "schema": schema } }
        })
    };
    let redirect = |description: &str| json!({ "description": description });
    let form = |schema: &str| {
        json!({
            "required": true,
            "content": { "application/x-www-form-urlencoded": {
                "schema": { "$ref": format!("#/components/schemas/{}", schema) }
            } }
        })
    };
    let id_param = json!([{
        "name": "id", "in": "path", "required": true,
        "schema": { "type": "integer", "format": "int64" }
    }]);
    let array_of = |schema: &str| {
        json!({ "type": "array", "items": { "$ref": format!("#/components/schemas/{}", schema) } })
    };

    json!({
        "paths": {
            "/": {
                "get": {
                    "summary": "List books",
                    "tags": ["Books"],
                    "responses": { "200": ok_json("All books", array_of("Book")) }
                },
                "post": {
                    "summary": "Add a book",
                    "tags": ["Books"],
                    "requestBody": form("BookForm"),
                    "responses": {
                        "303": redirect("Created; redirects to the book list"),
                        "422": error("Invalid fields")
                    }
                }
            },
            "/{id}": {
                "parameters": id_param.clone(),
                "get": {
                    "summary": "Book detail with its inventory log",
                    "tags": ["Books"],
                    "responses": {
                        "200": ok_json("Book detail", json!({ "$ref": "#/components/schemas/BookDetail" })),
                        "404": error("Book not found")
                    }
                },
                "post": {
                    "summary": "Edit a book",
                    "tags": ["Books"],
                    "requestBody": form("BookForm"),
                    "responses": {
                        "303": redirect("Updated; redirects to the book detail"),
                        "404": error("Book not found"),
                        "422": error("Invalid fields")
                    }
                }
            },
            "/{id}/delete": {
                "parameters": id_param.clone(),
                "post": {
                    "summary": "Delete a book and its inventory log",
                    "tags": ["Books"],
                    "responses": { "303": redirect("Deleted (or absent); redirects to the book list") }
                }
            },
            "/{id}/inventory": {
                "parameters": id_param,
                "post": {
                    "summary": "Adjust stock and record the change",
                    "tags": ["Inventory"],
                    "requestBody": form("AdjustmentForm"),
                    "responses": {
                        "303": redirect("Recorded; redirects to the book detail"),
                        "404": error("Book not found"),
                        "422": error("Invalid adjustment")
                    }
                }
            },
            "/logs": {
                "get": {
                    "summary": "All inventory log entries, newest first",
                    "tags": ["Inventory"],
                    "responses": { "200": ok_json("Log entries", array_of("LogEntry")) }
                }
            },
            "/levels": {
                "get": {
                    "summary": "Stock level per book",
                    "tags": ["Inventory"],
                    "responses": { "200": ok_json("Stock levels", array_of("StockLevel")) }
                }
            }
        },
        "components": {
            "schemas": {
                "Book": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer", "format": "int64" },
                        "name": { "type": "string", "maxLength": 100 },
                        "author": { "type": "string", "maxLength": 100 },
                        "description": { "type": "string" },
                        "stock": { "type": "integer", "format": "int64" },
                        "image": { "type": "string", "maxLength": 255 }
                    },
                    "required": ["id", "name", "author", "description", "stock", "image"]
                },
                "InventoryLog": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer", "format": "int64" },
                        "book_id": { "type": "integer", "format": "int64" },
                        "quantity_change": { "type": "integer", "format": "int64" },
                        "description": { "type": "string" },
                        "timestamp": { "type": "string", "format": "date-time" }
                    },
                    "required": ["id", "book_id", "quantity_change", "description", "timestamp"]
                },
                "BookDetail": {
                    "allOf": [
                        { "$ref": "#/components/schemas/Book" },
                        {
                            "type": "object",
                            "properties": { "logs": array_of("InventoryLog") },
                            "required": ["logs"]
                        }
                    ]
                },
                "LogEntry": {
                    "type": "object",
                    "properties": {
                        "log_id": { "type": "integer", "format": "int64" },
                        "book_id": { "type": "integer", "format": "int64" },
                        "book_name": { "type": "string" },
                        "quantity_change": { "type": "integer", "format": "int64" },
                        "description": { "type": "string" },
                        "timestamp": { "type": "string", "format": "date-time" }
                    },
                    "required": ["log_id", "book_id", "book_name", "quantity_change", "description", "timestamp"]
                },
                "StockLevel": {
                    "type": "object",
                    "properties": {
                        "book_id": { "type": "integer", "format": "int64" },
                        "name": { "type": "string" },
                        "stock": { "type": "integer", "format": "int64" }
                    },
                    "required": ["book_id", "name", "stock"]
                },
                "BookForm": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "author": { "type": "string" },
                        "description": { "type": "string" },
                        "stock": { "type": "string", "description": "Signed integer" },
                        "image": { "type": "string" }
                    },
                    "required": ["name", "author", "description", "stock", "image"]
                },
                "AdjustmentForm": {
                    "type": "object",
                    "properties": {
                        "quantity": { "type": "string", "description": "Signed integer delta" },
                        "description": { "type": "string" },
                        "timestamp": { "type": "string", "format": "date-time" }
                    },
                    "required": ["quantity", "description"]
                }
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::models::{BookDraft, BookForm};
    use super::*;
    use stockbook_kernel::settings::DatabaseSettings;

    /// Fresh in-memory database with the books schema applied.
    pub async fn pool() -> sqlx::SqlitePool {
        migrated(&DatabaseSettings::in_memory()).await
    }

    /// File-backed database with several connections, for concurrent writers.
    pub async fn file_pool(path: &std::path::Path) -> sqlx::SqlitePool {
        migrated(&DatabaseSettings {
            url: format!("sqlite://{}", path.display()),
            max_connections: 5,
        })
        .await
    }

    async fn migrated(settings: &DatabaseSettings) -> sqlx::SqlitePool {
        let pool = stockbook_db::connect(settings).await.unwrap();
        let migrations: Vec<(String, Migration)> = BooksModule::new()
            .migrations()
            .into_iter()
            .map(|migration| ("books".to_string(), migration))
            .collect();
        stockbook_db::apply_migrations(&pool, &migrations)
            .await
            .unwrap();
        pool
    }

    pub fn dune_form() -> BookForm {
        BookForm {
            name: "Dune".into(),
            author: "Herbert".into(),
            description: "Sci-fi".into(),
            stock: "10".into(),
            image: "dune.jpg".into(),
        }
    }

    pub fn sample_draft() -> BookDraft {
        dune_form().validate(true).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockbook_kernel::settings::Settings;

    #[tokio::test]
    async fn init_builds_routes_from_settings() {
        let pool = test_support::pool().await;
        let settings = Settings::default();
        let module = BooksModule::new();
        assert!(module.state().is_none());

        module
            .init(&InitCtx {
                settings: &settings,
                db: &pool,
            })
            .await
            .unwrap();

        assert!(module.state().is_some());
        let _router = module.routes();
    }

    #[tokio::test]
    async fn init_rejects_unknown_time_zone() {
        let pool = test_support::pool().await;
        let mut settings = Settings::default();
        settings.inventory.time_zone = "Atlantis/Capital".to_string();

        let result = BooksModule::new()
            .init(&InitCtx {
                settings: &settings,
                db: &pool,
            })
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn openapi_fragment_documents_every_route() {
        let fragment = openapi_fragment();
        for path in ["/", "/{id}", "/{id}/delete", "/{id}/inventory", "/logs", "/levels"] {
            assert!(fragment["paths"][path].is_object(), "missing {path}");
        }
    }
}
