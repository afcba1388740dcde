pub mod auth;
pub mod config;
pub mod currency;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use auth::{Claims, TokenService};
pub use currency::{
    Conversion, Country, CountryDirectory, CurrencyCode, CurrencyConverter, CurrencyError,
    ExchangeRates, RateProvider,
};
pub use domain::approval::{ApprovalStep, StepId, StepStatus};
pub use domain::company::{Company, CompanyId};
pub use domain::expense::{Expense, ExpenseId, ExpenseStatus, NewExpense};
pub use domain::user::{Role, User, UserId, UserSummary};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use workflow::{Decision, OverrideOutcome, WorkflowError};
