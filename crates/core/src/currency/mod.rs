use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper-case ISO-4217 style code such as `USD`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(raw: &str) -> Result<Self, CurrencyError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError::InvalidCode(raw.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("invalid currency code `{0}`")]
    InvalidCode(String),
    #[error("no exchange rate from {from} to {to}")]
    RateNotFound { from: CurrencyCode, to: CurrencyCode },
    #[error("exchange rate provider failed: {0}")]
    Provider(String),
    #[error("{amount} {from} cannot be represented after conversion to {to}")]
    AmountOutOfRange { amount: Decimal, from: CurrencyCode, to: CurrencyCode },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub base: CurrencyCode,
    pub date: Option<String>,
    pub rates: BTreeMap<String, Decimal>,
}

impl ExchangeRates {
    pub fn rate_for(&self, to: &CurrencyCode) -> Option<Decimal> {
        self.rates.get(to.as_str()).copied()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyInfo {
    pub name: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub name: String,
    pub currencies: BTreeMap<String, CurrencyInfo>,
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn latest(&self, base: &CurrencyCode) -> Result<ExchangeRates, CurrencyError>;
}

#[async_trait]
pub trait CountryDirectory: Send + Sync {
    async fn countries(&self) -> Result<Vec<Country>, CurrencyError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Conversion {
    pub amount: Decimal,
    pub converted_amount: Decimal,
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub exchange_rate: Decimal,
    /// Set when a lenient conversion fell back to 1:1.
    #[serde(skip)]
    pub fallback_reason: Option<String>,
}

impl Conversion {
    pub fn identity(amount: Decimal, currency: CurrencyCode) -> Self {
        Self {
            amount,
            converted_amount: amount,
            from: currency.clone(),
            to: currency,
            exchange_rate: Decimal::ONE,
            fallback_reason: None,
        }
    }

    fn fallback(amount: Decimal, from: CurrencyCode, to: CurrencyCode, reason: String) -> Self {
        Self {
            amount,
            converted_amount: amount,
            from,
            to,
            exchange_rate: Decimal::ONE,
            fallback_reason: Some(reason),
        }
    }
}

#[derive(Clone)]
pub struct CurrencyConverter {
    provider: Arc<dyn RateProvider>,
}

impl CurrencyConverter {
    pub fn new(provider: Arc<dyn RateProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn RateProvider> {
        &self.provider
    }

    pub async fn convert(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> Result<Conversion, CurrencyError> {
        if from == to {
            return Ok(Conversion::identity(amount, from.clone()));
        }

        let rates = self.provider.latest(from).await?;
        let rate = rates
            .rate_for(to)
            .ok_or_else(|| CurrencyError::RateNotFound { from: from.clone(), to: to.clone() })?;

        let converted_amount = amount.checked_mul(rate).ok_or_else(|| {
            CurrencyError::AmountOutOfRange { amount, from: from.clone(), to: to.clone() }
        })?;

        Ok(Conversion {
            amount,
            converted_amount,
            from: from.clone(),
            to: to.clone(),
            exchange_rate: rate,
            fallback_reason: None,
        })
    }

    /// Like [`convert`](Self::convert) but a lookup problem yields a 1:1
    /// conversion carrying the reason. Only an unrepresentable amount fails.
    pub async fn convert_or_identity(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> Result<Conversion, CurrencyError> {
        match self.convert(amount, from, to).await {
            Ok(conversion) => Ok(conversion),
            Err(error @ CurrencyError::AmountOutOfRange { .. }) => Err(error),
            Err(error) => {
                Ok(Conversion::fallback(amount, from.clone(), to.clone(), error.to_string()))
            }
        }
    }
}

/// Rate table held in memory, keyed by base currency.
#[derive(Clone, Debug, Default)]
pub struct StaticRateProvider {
    tables: HashMap<CurrencyCode, BTreeMap<String, Decimal>>,
}

impl StaticRateProvider {
    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        if let (Ok(from), Ok(to)) = (CurrencyCode::parse(from), CurrencyCode::parse(to)) {
            self.tables.entry(from).or_default().insert(to.as_str().to_string(), rate);
        }
        self
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn latest(&self, base: &CurrencyCode) -> Result<ExchangeRates, CurrencyError> {
        let rates = self
            .tables
            .get(base)
            .cloned()
            .ok_or_else(|| CurrencyError::Provider(format!("no rate table for {base}")))?;
        Ok(ExchangeRates { base: base.clone(), date: None, rates })
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticCountryDirectory {
    countries: Vec<Country>,
}

impl StaticCountryDirectory {
    pub fn new(countries: Vec<Country>) -> Self {
        Self { countries }
    }
}

#[async_trait]
impl CountryDirectory for StaticCountryDirectory {
    async fn countries(&self) -> Result<Vec<Country>, CurrencyError> {
        Ok(self.countries.clone())
    }
}
