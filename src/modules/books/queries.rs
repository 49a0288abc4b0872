use std::sync::Arc;

use super::error::InventoryResult;
use super::models::{Book, BookDetail, BookId, LogEntryView, StockLevel};
use super::store::BookStore;

/// Read-only accessors used by presentation. Reads are not isolated from
/// concurrent writes.
#[derive(Clone)]
pub struct BookQueries {
    store: Arc<dyn BookStore>,
}

impl BookQueries {
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self { store }
    }

    pub async fn list_books(&self) -> InventoryResult<Vec<Book>> {
        self.store.fetch_books().await
    }

    /// A book with its log, oldest entry first; entries sharing a timestamp
    /// keep insertion order.
    pub async fn get_book(&self, id: BookId) -> InventoryResult<BookDetail> {
        let (book, mut logs) = self.store.fetch_book_with_logs(id).await?;
        logs.sort_by_key(|log| log.timestamp);
        Ok(BookDetail { book, logs })
    }

    /// Every log entry across all books, most recent first. Entries sharing a
    /// timestamp keep insertion order.
    pub async fn list_all_logs(&self) -> InventoryResult<Vec<LogEntryView>> {
        let mut logs = self.store.fetch_all_logs().await?;
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(logs)
    }

    pub async fn stock_levels(&self) -> InventoryResult<Vec<StockLevel>> {
        Ok(self
            .store
            .fetch_books()
            .await?
            .into_iter()
            .map(|book| StockLevel {
                book_id: book.id,
                name: book.name,
                stock: book.stock,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::books::error::InventoryError;
    use crate::modules::books::models::{AdjustmentForm, BookForm};
    use crate::modules::books::service::{InventoryPolicy, InventoryService};
    use crate::modules::books::store::SqliteBookStore;
    use crate::modules::books::test_support::{dune_form, pool};

    async fn setup() -> (InventoryService, BookQueries) {
        let store: Arc<dyn BookStore> = Arc::new(SqliteBookStore::new(pool().await));
        (
            InventoryService::new(store.clone(), InventoryPolicy::default()),
            BookQueries::new(store),
        )
    }

    fn stamped(quantity: &str, description: &str, timestamp: &str) -> AdjustmentForm {
        AdjustmentForm {
            quantity: quantity.to_string(),
            description: description.to_string(),
            timestamp: Some(timestamp.to_string()),
        }
    }

    #[tokio::test]
    async fn created_book_reads_back_with_empty_log() {
        let (service, queries) = setup().await;
        let book = service.create_book(&dune_form()).await.unwrap();

        let detail = queries.get_book(book.id).await.unwrap();

        assert_eq!(detail.book, book);
        assert_eq!(detail.book.name, "Dune");
        assert_eq!(detail.book.author, "Herbert");
        assert_eq!(detail.book.description, "Sci-fi");
        assert_eq!(detail.book.stock, 10);
        assert_eq!(detail.book.image, "dune.jpg");
        assert!(detail.logs.is_empty());
    }

    #[tokio::test]
    async fn padded_fields_read_back_unchanged() {
        let (service, queries) = setup().await;
        let book = service
            .create_book(&BookForm {
                name: " Dune ".into(),
                author: "Herbert ".into(),
                ..dune_form()
            })
            .await
            .unwrap();

        let detail = queries.get_book(book.id).await.unwrap();
        assert_eq!(detail.book.name, " Dune ");
        assert_eq!(detail.book.author, "Herbert ");
        assert_eq!(detail.book, book);
    }

    #[tokio::test]
    async fn all_logs_are_newest_first_across_offsets() {
        let (service, queries) = setup().await;
        let dune = service.create_book(&dune_form()).await.unwrap();
        let emma = service
            .create_book(&BookForm {
                name: "Emma".into(),
                author: "Austen".into(),
                ..dune_form()
            })
            .await
            .unwrap();

        // 10:00Z, then 09:30Z written with a +02:00 offset, then 11:00Z.
        service
            .adjust_inventory(dune.id, &stamped("1", "a", "2024-01-01T10:00:00Z"))
            .await
            .unwrap();
        service
            .adjust_inventory(emma.id, &stamped("2", "b", "2024-01-01T11:30:00+02:00"))
            .await
            .unwrap();
        service
            .adjust_inventory(dune.id, &stamped("3", "c", "2024-01-01T11:00:00Z"))
            .await
            .unwrap();

        let logs = queries.list_all_logs().await.unwrap();
        let order: Vec<&str> = logs.iter().map(|l| l.description.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(logs[2].book_name, "Emma");
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        let (service, queries) = setup().await;
        let book = service.create_book(&dune_form()).await.unwrap();
        for description in ["first", "second", "third"] {
            service
                .adjust_inventory(book.id, &stamped("1", description, "2024-02-02T08:00:00Z"))
                .await
                .unwrap();
        }

        let listed: Vec<String> = queries
            .list_all_logs()
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.description)
            .collect();
        assert_eq!(listed, vec!["first", "second", "third"]);

        let detail = queries.get_book(book.id).await.unwrap();
        let detail_order: Vec<&str> = detail.logs.iter().map(|l| l.description.as_str()).collect();
        assert_eq!(detail_order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn dune_scenario() {
        let (service, queries) = setup().await;
        let book = service.create_book(&dune_form()).await.unwrap();
        assert_eq!(book.stock, 10);

        let (after, _) = service
            .adjust_inventory(book.id, &stamped("-3", "sold 3", "2024-03-01T10:00:00Z"))
            .await
            .unwrap();
        assert_eq!(after.stock, 7);
        let detail = queries.get_book(book.id).await.unwrap();
        assert_eq!(detail.logs.len(), 1);
        assert_eq!(detail.logs[0].quantity_change, -3);

        service
            .adjust_inventory(book.id, &stamped("+5", "restock", "2024-03-02T10:00:00Z"))
            .await
            .unwrap();
        let detail = queries.get_book(book.id).await.unwrap();
        assert_eq!(detail.book.stock, 12);
        assert_eq!(detail.logs.len(), 2);
        assert_eq!(
            detail.logs.iter().map(|l| l.quantity_change).sum::<i64>() + 10,
            detail.book.stock
        );

        service.delete_book(book.id).await.unwrap();
        assert!(matches!(
            queries.get_book(book.id).await,
            Err(InventoryError::NotFound { .. })
        ));
        assert!(queries
            .list_all_logs()
            .await
            .unwrap()
            .iter()
            .all(|log| log.book_id != book.id));
    }

    #[tokio::test]
    async fn stock_levels_follow_books() {
        let (service, queries) = setup().await;
        let book = service.create_book(&dune_form()).await.unwrap();

        let levels = queries.stock_levels().await.unwrap();
        assert_eq!(
            levels,
            vec![StockLevel {
                book_id: book.id,
                name: "Dune".into(),
                stock: 10,
            }]
        );
    }
}
