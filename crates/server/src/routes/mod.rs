use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use expensa_core::domain::expense::Expense;

use crate::dto::{referenced_users, ExpenseView};
use crate::error::ApiError;
use crate::receipts::RECEIPT_ROUTE_PREFIX;
use crate::state::AppState;

pub mod approval;
pub mod auth;
pub mod currency;
pub mod expenses;

/// Multipart framing on top of the receipt itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// The `/api` surface plus static receipt files.
pub fn router(state: AppState) -> Router {
    let body_limit = state.receipts.max_bytes().saturating_add(MULTIPART_OVERHEAD_BYTES);
    let receipts_dir = state.receipts.dir().to_path_buf();

    Router::new()
        .nest("/api/auth", auth::router())
        .nest("/api/expenses", expenses::router())
        .nest("/api/approval", approval::router())
        .nest("/api/currency", currency::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .nest_service(RECEIPT_ROUTE_PREFIX, ServeDir::new(receipts_dir))
        .layer(TraceLayer::new_for_http())
}

pub(crate) async fn expense_views(
    state: &AppState,
    expenses: &[Expense],
) -> Result<Vec<ExpenseView>, ApiError> {
    let people = state.users.summaries(&referenced_users(expenses)).await?;
    Ok(expenses.iter().map(|expense| ExpenseView::build(expense, &people)).collect())
}

pub(crate) async fn expense_view(state: &AppState, expense: &Expense) -> Result<ExpenseView, ApiError> {
    let people = state.users.summaries(&referenced_users([expense])).await?;
    Ok(ExpenseView::build(expense, &people))
}
