//! SQLite connection pool factory and migration runner.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use stockbook_kernel::settings::DatabaseSettings;
use stockbook_kernel::{Migration, Module};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a pool for the configured database.
///
/// Foreign keys are switched on for every connection so `ON DELETE CASCADE`
/// and `REFERENCES` constraints hold. An in-memory database lives only as long
/// as its connection, so it gets exactly one connection that is never recycled.
pub async fn connect(settings: &DatabaseSettings) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&settings.url)
        .with_context(|| format!("invalid database url '{}'", settings.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let (options, pool_options) = if settings.is_in_memory() {
        let pool_options = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        (options, pool_options)
    } else {
        // Writers queue on the database lock instead of failing with SQLITE_BUSY.
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool_options =
            SqlitePoolOptions::new().max_connections(settings.max_connections.max(1));
        (options, pool_options)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database '{}'", settings.url))?;

    tracing::info!(target: "stockbook-db", url = %settings.url, "database pool ready");
    Ok(pool)
}

const MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        module     TEXT NOT NULL,
        id         TEXT NOT NULL,
        applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (module, id)
    )
"#;

/// Apply every migration that has not been recorded yet and return how many ran.
///
/// Each migration and its bookkeeping row commit together, so a failing
/// migration leaves neither its schema changes nor its record behind.
pub async fn apply_migrations(
    pool: &SqlitePool,
    migrations: &[(String, Migration)],
) -> anyhow::Result<usize> {
    sqlx::query(MIGRATIONS_TABLE)
        .execute(pool)
        .await
        .context("failed to create schema_migrations table")?;

    let applied: Vec<(String, String)> = sqlx::query("SELECT module, id FROM schema_migrations")
        .fetch_all(pool)
        .await
        .context("failed to read schema_migrations")?
        .into_iter()
        .map(|row| -> Result<(String, String), sqlx::Error> {
            Ok((row.try_get("module")?, row.try_get("id")?))
        })
        .collect::<Result<_, _>>()?;

    let mut count = 0;
    for (module, migration) in migrations {
        if applied
            .iter()
            .any(|(m, id)| m == module && id == migration.id)
        {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in statements(migration.up) {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {}/{} failed", module, migration.id))?;
        }
        sqlx::query("INSERT INTO schema_migrations (module, id) VALUES (?, ?)")
            .bind(module)
            .bind(migration.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(target: "stockbook-db", %module, id = migration.id, "migration applied");
        count += 1;
    }

    Ok(count)
}

fn statements(script: &str) -> impl Iterator<Item = &str> {
    script.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Core module owning the pool's lifetime; closing it drains open connections on shutdown.
pub struct DbModule {
    pool: SqlitePool,
}

impl DbModule {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Module for DbModule {
    fn name(&self) -> &'static str {
        "db"
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        tracing::info!(target: "stockbook-db", "database pool closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<(String, Migration)> {
        vec![(
            "sample".to_string(),
            Migration {
                id: "001_init",
                up: "CREATE TABLE parent (id INTEGER PRIMARY KEY);
                     CREATE TABLE child (
                         id INTEGER PRIMARY KEY,
                         parent_id INTEGER NOT NULL REFERENCES parent(id) ON DELETE CASCADE
                     );",
            },
        )]
    }

    #[test]
    fn splits_scripts_on_semicolons() {
        let parts: Vec<&str> = statements("CREATE TABLE a (x);\n  ;CREATE TABLE b (y);  ").collect();
        assert_eq!(parts, vec!["CREATE TABLE a (x)", "CREATE TABLE b (y)"]);
    }

    #[tokio::test]
    async fn migrations_apply_once() {
        let pool = connect(&DatabaseSettings::in_memory()).await.unwrap();

        assert_eq!(apply_migrations(&pool, &sample()).await.unwrap(), 1);
        assert_eq!(apply_migrations(&pool, &sample()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_migration_leaves_no_record() {
        let pool = connect(&DatabaseSettings::in_memory()).await.unwrap();
        let broken = vec![(
            "sample".to_string(),
            Migration {
                id: "001_broken",
                up: "CREATE TABLE ok (id INTEGER); CREATE TABLE",
            },
        )];

        assert!(apply_migrations(&pool, &broken).await.is_err());

        let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(recorded, 0);
        let tables: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE name = 'ok'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(tables, 0);
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let pool = connect(&DatabaseSettings::in_memory()).await.unwrap();
        apply_migrations(&pool, &sample()).await.unwrap();

        let orphan = sqlx::query("INSERT INTO child (id, parent_id) VALUES (1, 42)")
            .execute(&pool)
            .await;
        assert!(orphan.is_err());
    }
}
