use serde::Serialize;
use thiserror::Error;

use stockbook_http::error::AppError;

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Failures of the inventory operations.
///
/// `Validation` and `NotFound` are the caller's to fix; `Storage` means the
/// transaction was rolled back and nothing was written.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("invalid input: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl InventoryError {
    pub fn book_not_found(id: super::models::BookId) -> Self {
        Self::NotFound {
            entity: "book",
            id: id.0,
        }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type InventoryResult<T> = Result<T, InventoryError>;

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Validation(errors) => {
                let message = summarize(&errors);
                let details = errors
                    .into_iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect();
                AppError::validation(details, message)
            }
            err @ InventoryError::NotFound { .. } => AppError::not_found(err.to_string()),
            InventoryError::Storage(err) => AppError::Internal(anyhow::Error::new(err)),
        }
    }
}
