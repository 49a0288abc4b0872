//! Form-accepting, JSON-returning routes for the books module.
//!
//! Writes answer with `303 See Other` to the page a browser would show next.

use axum::{
    extract::{rejection::PathRejection, Path, State},
    response::Redirect,
    routing::{get, post},
    Form, Json, Router,
};

use stockbook_http::error::AppError;

use super::models::{AdjustmentForm, Book, BookDetail, BookForm, BookId, LogEntryView, StockLevel};
use super::queries::BookQueries;
use super::service::InventoryService;

/// Where the module's router is nested by the HTTP server.
pub const BASE_PATH: &str = "/api/books";

/// Shared handles for the books routes.
#[derive(Clone)]
pub struct BooksState {
    pub service: InventoryService,
    pub queries: BookQueries,
}

pub fn router(state: BooksState) -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/logs", get(list_logs))
        .route("/levels", get(stock_levels))
        .route("/{id}", get(book_detail).post(edit_book))
        .route("/{id}/delete", post(delete_book))
        .route("/{id}/inventory", post(adjust_inventory))
        .with_state(state)
}

fn detail_path(id: BookId) -> String {
    format!("{}/{}", BASE_PATH, id)
}

/// A malformed id answers with the JSON error envelope, not axum's plain-text 400.
fn book_id(path: Result<Path<i64>, PathRejection>) -> Result<BookId, AppError> {
    path.map(|Path(id)| BookId(id))
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

async fn list_books(State(state): State<BooksState>) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(state.queries.list_books().await?))
}

async fn create_book(
    State(state): State<BooksState>,
    Form(form): Form<BookForm>,
) -> Result<Redirect, AppError> {
    state.service.create_book(&form).await?;
    Ok(Redirect::to(BASE_PATH))
}

async fn book_detail(
    State(state): State<BooksState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<BookDetail>, AppError> {
    Ok(Json(state.queries.get_book(book_id(path)?).await?))
}

async fn edit_book(
    State(state): State<BooksState>,
    path: Result<Path<i64>, PathRejection>,
    Form(form): Form<BookForm>,
) -> Result<Redirect, AppError> {
    let book = state.service.update_book(book_id(path)?, &form).await?;
    Ok(Redirect::to(&detail_path(book.id)))
}

async fn delete_book(
    State(state): State<BooksState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Redirect, AppError> {
    state.service.delete_book(book_id(path)?).await?;
    Ok(Redirect::to(BASE_PATH))
}

async fn adjust_inventory(
    State(state): State<BooksState>,
    path: Result<Path<i64>, PathRejection>,
    Form(form): Form<AdjustmentForm>,
) -> Result<Redirect, AppError> {
    let (book, _) = state.service.adjust_inventory(book_id(path)?, &form).await?;
    Ok(Redirect::to(&detail_path(book.id)))
}

async fn list_logs(State(state): State<BooksState>) -> Result<Json<Vec<LogEntryView>>, AppError> {
    Ok(Json(state.queries.list_all_logs().await?))
}

async fn stock_levels(State(state): State<BooksState>) -> Result<Json<Vec<StockLevel>>, AppError> {
    Ok(Json(state.queries.stock_levels().await?))
}
