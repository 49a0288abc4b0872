use std::sync::Arc;

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use chrono_tz::Tz;
use stockbook_kernel::settings::InventorySettings;

use super::error::{InventoryError, InventoryResult};
use super::models::{AdjustmentForm, Book, BookForm, BookId, InventoryLog, NewLogEntry};
use super::store::BookStore;

/// Source of "now" for log entries the caller did not stamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Policy applied by every write.
#[derive(Debug, Clone)]
pub struct InventoryPolicy {
    /// Zone used to stamp log entries that arrive without a timestamp.
    pub time_zone: Tz,
    pub allow_negative_stock: bool,
}

impl Default for InventoryPolicy {
    fn default() -> Self {
        Self {
            time_zone: Tz::UTC,
            allow_negative_stock: true,
        }
    }
}

impl TryFrom<&InventorySettings> for InventoryPolicy {
    type Error = anyhow::Error;

    fn try_from(settings: &InventorySettings) -> Result<Self, Self::Error> {
        let time_zone = settings.time_zone.parse::<Tz>().map_err(|err| {
            anyhow::anyhow!("invalid inventory.time_zone '{}': {}", settings.time_zone, err)
        })?;

        Ok(Self {
            time_zone,
            allow_negative_stock: settings.allow_negative_stock,
        })
    }
}

/// The only write path to books and inventory logs.
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<dyn BookStore>,
    policy: InventoryPolicy,
    clock: Arc<dyn Clock>,
}

impl InventoryService {
    pub fn new(store: Arc<dyn BookStore>, policy: InventoryPolicy) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn BookStore>,
        policy: InventoryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &InventoryPolicy {
        &self.policy
    }

    pub async fn create_book(&self, form: &BookForm) -> InventoryResult<Book> {
        let draft = form
            .validate(self.policy.allow_negative_stock)
            .map_err(InventoryError::Validation)?;

        let book = self.store.insert_book(&draft).await?;
        tracing::info!(book_id = %book.id, stock = book.stock, "book created");
        Ok(book)
    }

    /// Overwrite a book's fields. Logs are left alone, so an edited stock no
    /// longer equals the sum of its log entries; that is the edit's purpose.
    pub async fn update_book(&self, id: BookId, form: &BookForm) -> InventoryResult<Book> {
        let draft = form
            .validate(self.policy.allow_negative_stock)
            .map_err(InventoryError::Validation)?;

        let book = self.store.update_book(id, &draft).await?;
        tracing::info!(book_id = %id, stock = book.stock, "book updated");
        Ok(book)
    }

    /// Delete a book and all of its logs. Deleting an absent book is a no-op.
    pub async fn delete_book(&self, id: BookId) -> InventoryResult<()> {
        if self.store.delete_book(id).await? {
            tracing::info!(book_id = %id, "book deleted");
        } else {
            tracing::debug!(book_id = %id, "delete skipped, book absent");
        }
        Ok(())
    }

    /// Apply a signed stock change and record it, as one transaction.
    pub async fn adjust_inventory(
        &self,
        id: BookId,
        form: &AdjustmentForm,
    ) -> InventoryResult<(Book, InventoryLog)> {
        let adjustment = form.validate().map_err(InventoryError::Validation)?;

        let entry = NewLogEntry {
            quantity_change: adjustment.quantity_change,
            description: adjustment.description,
            // Storage keeps microseconds; the returned entry must match what is read back.
            timestamp: adjustment
                .timestamp
                .unwrap_or_else(|| self.now())
                .trunc_subsecs(6),
        };

        let (book, log) = self
            .store
            .append_log(id, &entry, self.policy.allow_negative_stock)
            .await?;

        tracing::info!(
            book_id = %id,
            log_id = %log.id,
            quantity_change = log.quantity_change,
            stock = book.stock,
            "inventory adjusted"
        );
        Ok((book, log))
    }

    /// Current time in the configured zone.
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock
            .now()
            .with_timezone(&self.policy.time_zone)
            .fixed_offset()
    }
}
