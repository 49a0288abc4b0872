//! Persistence for books and their inventory logs.
//!
//! Every write runs inside one transaction. An error returned before `commit`
//! drops the transaction, which rolls it back, so callers never observe a
//! stock change without its log entry or a book without its logs removed.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::error::{InventoryError, InventoryResult};
use super::models::{Book, BookDraft, BookId, InventoryLog, LogEntryView, LogId, NewLogEntry};

/// Schema owned by the books module, applied as migration `001_init`.
pub const SCHEMA: &str = r#"
    CREATE TABLE book (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT    NOT NULL CHECK (length(name) > 0 AND length(name) <= 100),
        author      TEXT    NOT NULL CHECK (length(author) > 0 AND length(author) <= 100),
        description TEXT    NOT NULL CHECK (length(description) > 0),
        stock       INTEGER NOT NULL CHECK (typeof(stock) = 'integer'),
        image       TEXT    NOT NULL CHECK (length(image) > 0 AND length(image) <= 255)
    );
    CREATE TABLE inventory_log (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        quantity_change INTEGER NOT NULL,
        description     TEXT    NOT NULL CHECK (length(description) > 0),
        timestamp       TEXT    NOT NULL,
        book_id         INTEGER NOT NULL REFERENCES book(id) ON DELETE CASCADE
    );
    CREATE INDEX inventory_log_book_id ON inventory_log (book_id);
"#;

/// Storage capabilities the inventory service and query facade are built on.
///
/// Implementations must make each method atomic.
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn insert_book(&self, draft: &BookDraft) -> InventoryResult<Book>;

    /// Overwrite every field of an existing book; logs are untouched.
    async fn update_book(&self, id: BookId, draft: &BookDraft) -> InventoryResult<Book>;

    /// Remove a book and its logs. Returns `false` when the book did not exist.
    async fn delete_book(&self, id: BookId) -> InventoryResult<bool>;

    async fn fetch_book(&self, id: BookId) -> InventoryResult<Book>;

    async fn fetch_books(&self) -> InventoryResult<Vec<Book>>;

    /// A book and its logs read from one snapshot, logs in insertion order.
    async fn fetch_book_with_logs(&self, id: BookId) -> InventoryResult<(Book, Vec<InventoryLog>)>;

    /// All logs joined with their book's name, in insertion order.
    async fn fetch_all_logs(&self) -> InventoryResult<Vec<LogEntryView>>;

    /// Apply `entry.quantity_change` to the book's stock and append the entry.
    ///
    /// The stock change is a relative `UPDATE`, never a read-modify-write. With
    /// `allow_negative` false, a change that would leave stock below zero fails
    /// with a validation error and writes nothing. So does a change whose result
    /// would not fit in an `i64`.
    async fn append_log(
        &self,
        id: BookId,
        entry: &NewLogEntry,
        allow_negative: bool,
    ) -> InventoryResult<(Book, InventoryLog)>;
}

/// [`BookStore`] backed by the SQLite tables in [`SCHEMA`].
#[derive(Debug, Clone)]
pub struct SqliteBookStore {
    pool: SqlitePool,
}

impl SqliteBookStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const BOOK_COLUMNS: &str = "id, name, author, description, stock, image";
const LOG_COLUMNS: &str = "id, book_id, quantity_change, description, timestamp";

fn book_from_row(row: &SqliteRow) -> Result<Book, sqlx::Error> {
    Ok(Book {
        id: BookId(row.try_get("id")?),
        name: row.try_get("name")?,
        author: row.try_get("author")?,
        description: row.try_get("description")?,
        stock: row.try_get("stock")?,
        image: row.try_get("image")?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<InventoryLog, sqlx::Error> {
    Ok(InventoryLog {
        id: LogId(row.try_get("id")?),
        book_id: BookId(row.try_get("book_id")?),
        quantity_change: row.try_get("quantity_change")?,
        description: row.try_get("description")?,
        timestamp: decode_timestamp(row)?,
    })
}

fn log_view_from_row(row: &SqliteRow) -> Result<LogEntryView, sqlx::Error> {
    Ok(LogEntryView {
        log_id: LogId(row.try_get("id")?),
        book_id: BookId(row.try_get("book_id")?),
        book_name: row.try_get("book_name")?,
        quantity_change: row.try_get("quantity_change")?,
        description: row.try_get("description")?,
        timestamp: decode_timestamp(row)?,
    })
}

/// Timestamps are stored as RFC 3339 text so the writer's offset survives.
fn encode_timestamp(entry: &NewLogEntry) -> String {
    entry.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn decode_timestamp(row: &SqliteRow) -> Result<chrono::DateTime<chrono::FixedOffset>, sqlx::Error> {
    let raw: String = row.try_get("timestamp")?;
    DateTime::parse_from_rfc3339(&raw).map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

/// Stock values that `quantity_change` can be added to without leaving `i64`.
fn stock_range_for(quantity_change: i64) -> (i64, i64) {
    if quantity_change >= 0 {
        (i64::MIN, i64::MAX - quantity_change)
    } else {
        (i64::MIN - quantity_change, i64::MAX)
    }
}

async fn select_book(
    tx: &mut Transaction<'_, Sqlite>,
    id: BookId,
) -> InventoryResult<Option<Book>> {
    let row = sqlx::query(&format!("SELECT {BOOK_COLUMNS} FROM book WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.as_ref().map(book_from_row).transpose()?)
}

#[async_trait]
impl BookStore for SqliteBookStore {
    async fn insert_book(&self, draft: &BookDraft) -> InventoryResult<Book> {
        let result = sqlx::query(
            "INSERT INTO book (name, author, description, stock, image) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&draft.name)
        .bind(&draft.author)
        .bind(&draft.description)
        .bind(draft.stock)
        .bind(&draft.image)
        .execute(&self.pool)
        .await?;

        Ok(Book {
            id: BookId(result.last_insert_rowid()),
            name: draft.name.clone(),
            author: draft.author.clone(),
            description: draft.description.clone(),
            stock: draft.stock,
            image: draft.image.clone(),
        })
    }

    async fn update_book(&self, id: BookId, draft: &BookDraft) -> InventoryResult<Book> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE book SET name = ?, author = ?, description = ?, stock = ?, image = ? WHERE id = ?",
        )
        .bind(&draft.name)
        .bind(&draft.author)
        .bind(&draft.description)
        .bind(draft.stock)
        .bind(&draft.image)
        .bind(id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(InventoryError::book_not_found(id));
        }

        let book = select_book(&mut tx, id)
            .await?
            .ok_or_else(|| InventoryError::book_not_found(id))?;
        tx.commit().await?;
        Ok(book)
    }

    async fn delete_book(&self, id: BookId) -> InventoryResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Explicit child delete first; the FK cascade covers any other writer.
        sqlx::query("DELETE FROM inventory_log WHERE book_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM book WHERE id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn fetch_book(&self, id: BookId) -> InventoryResult<Book> {
        let row = sqlx::query(&format!("SELECT {BOOK_COLUMNS} FROM book WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| InventoryError::book_not_found(id))?;
        Ok(book_from_row(&row)?)
    }

    async fn fetch_books(&self) -> InventoryResult<Vec<Book>> {
        let rows = sqlx::query(&format!("SELECT {BOOK_COLUMNS} FROM book ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(book_from_row).collect::<Result<_, _>>()?)
    }

    async fn fetch_book_with_logs(&self, id: BookId) -> InventoryResult<(Book, Vec<InventoryLog>)> {
        let mut tx = self.pool.begin().await?;

        let book = select_book(&mut tx, id)
            .await?
            .ok_or_else(|| InventoryError::book_not_found(id))?;
        let rows = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM inventory_log WHERE book_id = ? ORDER BY id"
        ))
        .bind(id.0)
        .fetch_all(&mut *tx)
        .await?;
        let logs = rows.iter().map(log_from_row).collect::<Result<_, _>>()?;

        tx.commit().await?;
        Ok((book, logs))
    }

    async fn fetch_all_logs(&self) -> InventoryResult<Vec<LogEntryView>> {
        let rows = sqlx::query(
            "SELECT l.id, l.book_id, b.name AS book_name, l.quantity_change, l.description, l.timestamp
             FROM inventory_log l
             JOIN book b ON b.id = l.book_id
             ORDER BY l.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(log_view_from_row).collect::<Result<_, _>>()?)
    }

    async fn append_log(
        &self,
        id: BookId,
        entry: &NewLogEntry,
        allow_negative: bool,
    ) -> InventoryResult<(Book, InventoryLog)> {
        let mut tx = self.pool.begin().await?;

        // SQLite turns an overflowing integer add into a REAL, so the row is
        // only touched when `stock` lies inside the range the change allows.
        let (lowest, highest) = stock_range_for(entry.quantity_change);
        let updated = sqlx::query(
            "UPDATE book SET stock = stock + ?
             WHERE id = ? AND stock BETWEEN ? AND ? AND (? OR stock + ? >= 0)",
        )
        .bind(entry.quantity_change)
        .bind(id.0)
        .bind(lowest)
        .bind(highest)
        .bind(allow_negative)
        .bind(entry.quantity_change)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return match select_book(&mut tx, id).await? {
                None => Err(InventoryError::book_not_found(id)),
                Some(book) => match book.stock.checked_add(entry.quantity_change) {
                    None => Err(InventoryError::invalid(
                        "quantity",
                        format!("would overflow the stock of {}", book.stock),
                    )),
                    Some(next) => Err(InventoryError::invalid(
                        "quantity",
                        format!("would take stock from {} to {}", book.stock, next),
                    )),
                },
            };
        }

        let log_id = sqlx::query(
            "INSERT INTO inventory_log (quantity_change, description, timestamp, book_id)
             VALUES (?, ?, ?, ?)",
        )
        .bind(entry.quantity_change)
        .bind(&entry.description)
        .bind(encode_timestamp(entry))
        .bind(id.0)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let book = select_book(&mut tx, id)
            .await?
            .ok_or_else(|| InventoryError::book_not_found(id))?;
        tx.commit().await?;

        let log = InventoryLog {
            id: LogId(log_id),
            book_id: id,
            quantity_change: entry.quantity_change,
            description: entry.description.clone(),
            timestamp: entry.timestamp,
        };
        Ok((book, log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::test_support::{file_pool, pool, sample_draft};
    use chrono::{FixedOffset, TimeZone};

    fn entry(quantity_change: i64, description: &str) -> NewLogEntry {
        NewLogEntry {
            quantity_change,
            description: description.to_string(),
            timestamp: FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
                .unwrap(),
        }
    }

    async fn log_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM inventory_log")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_then_fetch_round_trips() {
        let store = SqliteBookStore::new(pool().await);
        let book = store.insert_book(&sample_draft()).await.unwrap();

        assert_eq!(store.fetch_book(book.id).await.unwrap(), book);
        assert_eq!(store.fetch_books().await.unwrap(), vec![book]);
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = SqliteBookStore::new(pool().await);

        assert!(matches!(
            store.fetch_book(BookId(404)).await,
            Err(InventoryError::NotFound { id: 404, .. })
        ));
        assert!(matches!(
            store.update_book(BookId(404), &sample_draft()).await,
            Err(InventoryError::NotFound { .. })
        ));
        assert!(!store.delete_book(BookId(404)).await.unwrap());
    }

    #[tokio::test]
    async fn failed_log_insert_rolls_back_stock_change() {
        let pool = pool().await;
        let store = SqliteBookStore::new(pool.clone());
        let book = store.insert_book(&sample_draft()).await.unwrap();

        // The CHECK constraint rejects the log row after stock was already bumped.
        let result = store.append_log(book.id, &entry(5, ""), true).await;

        assert!(matches!(result, Err(InventoryError::Storage(_))));
        assert_eq!(store.fetch_book(book.id).await.unwrap().stock, 10);
        assert_eq!(log_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn stock_floor_is_enforced_atomically() {
        let pool = pool().await;
        let store = SqliteBookStore::new(pool.clone());
        let book = store.insert_book(&sample_draft()).await.unwrap();

        let result = store.append_log(book.id, &entry(-11, "oversold"), false).await;
        assert!(matches!(result, Err(InventoryError::Validation(_))));
        assert_eq!(store.fetch_book(book.id).await.unwrap().stock, 10);
        assert_eq!(log_count(&pool).await, 0);

        let (book, _) = store
            .append_log(book.id, &entry(-10, "sold out"), false)
            .await
            .unwrap();
        assert_eq!(book.stock, 0);
    }

    #[test]
    fn stock_range_excludes_overflowing_values() {
        assert_eq!(stock_range_for(0), (i64::MIN, i64::MAX));
        assert_eq!(stock_range_for(1), (i64::MIN, i64::MAX - 1));
        assert_eq!(stock_range_for(-1), (i64::MIN + 1, i64::MAX));
        assert_eq!(stock_range_for(i64::MIN), (0, i64::MAX));
    }

    #[tokio::test]
    async fn overflowing_change_is_a_validation_error() {
        let pool = pool().await;
        let store = SqliteBookStore::new(pool.clone());
        let book = store
            .insert_book(&BookDraft {
                stock: i64::MAX,
                ..sample_draft()
            })
            .await
            .unwrap();

        let result = store.append_log(book.id, &entry(1, "one more"), true).await;

        assert!(
            matches!(result, Err(InventoryError::Validation(ref fields)) if fields[0].field == "quantity")
        );
        assert_eq!(store.fetch_book(book.id).await.unwrap().stock, i64::MAX);
        assert_eq!(log_count(&pool).await, 0);

        let (book, _) = store
            .append_log(book.id, &entry(-1, "one less"), true)
            .await
            .unwrap();
        assert_eq!(book.stock, i64::MAX - 1);
    }

    #[tokio::test]
    async fn concurrent_adjustments_lose_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir.path().join("stockbook.db")).await;
        let store = SqliteBookStore::new(pool.clone());
        let book = store.insert_book(&sample_draft()).await.unwrap();

        let id = book.id;
        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..20 {
            let store = store.clone();
            tasks.spawn(async move {
                store
                    .append_log(id, &entry(1, &format!("restock {n}")), true)
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(store.fetch_book(id).await.unwrap().stock, 30);
        assert_eq!(log_count(&pool).await, 20);
        pool.close().await;
    }

    #[tokio::test]
    async fn foreign_key_cascade_removes_logs() {
        let pool = pool().await;
        let store = SqliteBookStore::new(pool.clone());
        let book = store.insert_book(&sample_draft()).await.unwrap();
        store.append_log(book.id, &entry(1, "found"), true).await.unwrap();

        // Bypass the explicit delete sequence to exercise the schema rule itself.
        sqlx::query("DELETE FROM book WHERE id = ?")
            .bind(book.id.0)
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(log_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn timestamps_keep_their_offset() {
        let store = SqliteBookStore::new(pool().await);
        let book = store.insert_book(&sample_draft()).await.unwrap();
        let tokyo = FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 8, 15, 0)
            .unwrap();
        let new_entry = NewLogEntry {
            timestamp: tokyo,
            ..entry(2, "donation")
        };

        store.append_log(book.id, &new_entry, true).await.unwrap();
        let (_, logs) = store.fetch_book_with_logs(book.id).await.unwrap();

        assert_eq!(logs[0].timestamp, tokyo);
        assert_eq!(logs[0].timestamp.offset().local_minus_utc(), 9 * 3600);
    }
}
