use std::sync::Arc;

use expensa_core::auth::TokenService;
use expensa_core::currency::{CountryDirectory, CurrencyCode, CurrencyConverter};
use expensa_db::repositories::{CompanyRepository, ExpenseRepository, UserRepository};

use crate::receipts::ReceiptStore;

/// Shared handler state. Everything behind an `Arc` so the router can clone
/// it per request.
#[derive(Clone)]
pub struct AppState {
    pub companies: Arc<dyn CompanyRepository>,
    pub users: Arc<dyn UserRepository>,
    pub expenses: Arc<dyn ExpenseRepository>,
    pub tokens: TokenService,
    pub converter: CurrencyConverter,
    pub countries: Arc<dyn CountryDirectory>,
    pub receipts: ReceiptStore,
    /// Used when a company registers without naming a currency.
    pub default_currency: CurrencyCode,
}
