use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use expensa_core::domain::company::{Company, CompanyId};
use expensa_core::domain::expense::{Expense, ExpenseId};
use expensa_core::domain::user::{User, UserId, UserSummary};

pub mod company;
pub mod expense;
pub mod memory;
mod rows;
pub mod user;

pub use company::SqlCompanyRepository;
pub use expense::SqlExpenseRepository;
pub use memory::{InMemoryCompanyRepository, InMemoryExpenseRepository, InMemoryUserRepository};
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Which expenses a listing covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpenseScope {
    /// Expenses the user submitted.
    SubmittedBy(UserId),
    /// Expenses where the user holds any approval step.
    AssignedTo(UserId),
    /// Open expenses where the user holds a still-pending step.
    AwaitingDecisionBy(UserId),
    /// Every expense of the company.
    Company(CompanyId),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExpenseOrder {
    #[default]
    NewestSubmitted,
    RecentlyUpdated,
}

#[async_trait]
pub trait CompanyRepository: Send + Sync {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Company>, RepositoryError>;
    /// Creates the company and its first admin in one transaction.
    async fn register(&self, company: Company, admin: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    async fn create(&self, user: User) -> Result<(), RepositoryError>;
    /// Persists role, manager, and active flag.
    async fn update(&self, user: &User) -> Result<(), RepositoryError>;
    async fn list_by_company(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError>;
    /// Active managers and admins of the company.
    async fn list_reviewers(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError>;
    /// Earliest-created active admin of the company.
    async fn find_company_admin(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<User>, RepositoryError>;
    async fn summaries(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserSummary>, RepositoryError>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    /// Inserts the expense and its approval steps together.
    async fn create(&self, expense: &Expense) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError>;
    async fn list(
        &self,
        scope: &ExpenseScope,
        order: ExpenseOrder,
    ) -> Result<Vec<Expense>, RepositoryError>;
    async fn count_pending_for(&self, approver_id: &UserId) -> Result<u64, RepositoryError>;
    /// Writes status, final comments, and step outcomes if the stored version
    /// still equals `expense.version`. Returns the new version; a stale
    /// version yields [`RepositoryError::Conflict`] and writes nothing.
    async fn save_transition(&self, expense: &Expense) -> Result<i64, RepositoryError>;
}

pub(crate) fn conflict_from_unique(error: sqlx::Error, message: impl Into<String>) -> RepositoryError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(message.into())
        }
        _ => RepositoryError::Database(error),
    }
}

pub(crate) fn stale_version(expense: &Expense) -> RepositoryError {
    RepositoryError::Conflict(format!(
        "expense `{}` changed since version {} was read",
        expense.id, expense.version
    ))
}
