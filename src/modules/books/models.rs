use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::error::FieldError;

/// Longest `name`/`author` accepted, matching the `book` table contract.
pub const MAX_TITLE_LEN: usize = 100;
/// Longest `image` reference accepted.
pub const MAX_IMAGE_LEN: usize = 255;

/// Database-assigned book identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub i64);

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Database-assigned inventory log identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub i64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An inventory item as stored in the `book` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub name: String,
    pub author: String,
    pub description: String,
    /// Running total; changes only through an adjustment or an edit.
    pub stock: i64,
    pub image: String,
}

/// An immutable record of one stock change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLog {
    pub id: LogId,
    pub book_id: BookId,
    pub quantity_change: i64,
    pub description: String,
    pub timestamp: DateTime<FixedOffset>,
}

/// A book together with its log, oldest entry first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDetail {
    #[serde(flatten)]
    pub book: Book,
    pub logs: Vec<InventoryLog>,
}

/// One row of the global inventory log listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntryView {
    pub log_id: LogId,
    pub book_id: BookId,
    pub book_name: String,
    pub quantity_change: i64,
    pub description: String,
    pub timestamp: DateTime<FixedOffset>,
}

/// Stock level of one book, the data behind the inventory levels chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub book_id: BookId,
    pub name: String,
    pub stock: i64,
}

/// Book fields as submitted by a client, before validation.
///
/// `stock` stays textual so a non-numeric submission is reported as a field
/// error instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stock: String,
    #[serde(default)]
    pub image: String,
}

/// Validated book fields ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDraft {
    pub name: String,
    pub author: String,
    pub description: String,
    pub stock: i64,
    pub image: String,
}

impl BookForm {
    /// Check every field and report all problems at once.
    pub fn validate(&self, allow_negative_stock: bool) -> Result<BookDraft, Vec<FieldError>> {
        let mut errors = Vec::new();

        let name = required_text("name", &self.name, Some(MAX_TITLE_LEN), &mut errors);
        let author = required_text("author", &self.author, Some(MAX_TITLE_LEN), &mut errors);
        let description = required_text("description", &self.description, None, &mut errors);

        let stock = match parse_integer("stock", &self.stock) {
            Ok(stock) if stock < 0 && !allow_negative_stock => {
                errors.push(FieldError::new("stock", "must not be negative"));
                None
            }
            Ok(stock) => Some(stock),
            Err(err) => {
                errors.push(err);
                None
            }
        };
        let image = required_text("image", &self.image, Some(MAX_IMAGE_LEN), &mut errors);

        match (name, author, description, stock, image) {
            (Some(name), Some(author), Some(description), Some(stock), Some(image))
                if errors.is_empty() =>
            {
                Ok(BookDraft {
                    name,
                    author,
                    description,
                    stock,
                    image,
                })
            }
            _ => Err(errors),
        }
    }
}

/// Stock adjustment as submitted by a client, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdjustmentForm {
    /// Signed quantity delta.
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub description: String,
    /// RFC 3339 instant; the service stamps "now" when absent.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Validated adjustment; the timestamp is still optional here because the
/// service owns the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub quantity_change: i64,
    pub description: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
}

impl AdjustmentForm {
    pub fn validate(&self) -> Result<Adjustment, Vec<FieldError>> {
        let mut errors = Vec::new();

        let quantity_change = parse_integer("quantity", &self.quantity)
            .map_err(|err| errors.push(err))
            .ok();
        let description = required_text("description", &self.description, None, &mut errors);

        let timestamp = match self.timestamp.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => Some(ts),
                Err(_) => {
                    errors.push(FieldError::new(
                        "timestamp",
                        "must be an RFC 3339 date-time",
                    ));
                    None
                }
            },
        };

        match (quantity_change, description) {
            (Some(quantity_change), Some(description)) if errors.is_empty() => Ok(Adjustment {
                quantity_change,
                description,
                timestamp,
            }),
            _ => Err(errors),
        }
    }
}

/// A log entry about to be appended: the service has resolved the timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub quantity_change: i64,
    pub description: String,
    pub timestamp: DateTime<FixedOffset>,
}

fn required_text(
    field: &'static str,
    value: &str,
    max_len: Option<usize>,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    // Blank values are rejected, but accepted values are stored as submitted.
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "is required"));
        return None;
    }
    if let Some(max) = max_len {
        if value.chars().count() > max {
            errors.push(FieldError::new(
                field,
                format!("must be at most {} characters", max),
            ));
            return None;
        }
    }
    Some(value.to_string())
}

fn parse_integer(field: &'static str, value: &str) -> Result<i64, FieldError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FieldError::new(field, "is required"));
    }
    value
        .parse::<i64>()
        .map_err(|_| FieldError::new(field, "must be an integer"))
}
