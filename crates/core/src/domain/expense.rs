use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::{Conversion, CurrencyCode};
use crate::domain::approval::{ApprovalStep, StepStatus};
use crate::domain::company::CompanyId;
use crate::domain::user::UserId;
use crate::errors::DomainError;
use crate::workflow::{self, PlannedStep};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl ExpenseId {
    pub fn generate() -> Self {
        Self(format!("EXP-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// Submission input after request parsing, before conversion and routing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewExpense {
    pub employee_id: UserId,
    pub company_id: CompanyId,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub category: String,
    pub description: String,
    pub expense_date: NaiveDate,
    pub receipt_url: Option<String>,
}

impl NewExpense {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::InvariantViolation(
                "amount must be greater than zero".to_string(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(DomainError::InvariantViolation("description is required".to_string()));
        }
        if normalize_category(&self.category).is_empty() {
            return Err(DomainError::InvariantViolation("category is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub employee_id: UserId,
    pub company_id: CompanyId,
    pub original_amount: Decimal,
    pub original_currency: CurrencyCode,
    pub converted_amount: Decimal,
    pub company_currency: CurrencyCode,
    pub exchange_rate: Decimal,
    pub category: String,
    pub description: String,
    pub expense_date: NaiveDate,
    pub receipt_url: Option<String>,
    pub status: ExpenseStatus,
    pub final_comments: Option<String>,
    pub steps: Vec<ApprovalStep>,
    pub version: i64,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    /// Builds a freshly submitted expense with one pending step per planned
    /// approver. An empty chain approves immediately.
    pub fn submit(
        input: NewExpense,
        conversion: &Conversion,
        chain: Vec<PlannedStep>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        input.validate()?;
        if conversion.from != input.currency || conversion.amount != input.amount {
            return Err(DomainError::InvariantViolation(
                "conversion does not match the submitted amount".to_string(),
            ));
        }

        let id = ExpenseId::generate();
        let steps = chain
            .into_iter()
            .map(|planned| {
                ApprovalStep::pending(
                    id.clone(),
                    planned.step_number,
                    planned.approver_id,
                    planned.approver_role,
                )
            })
            .collect::<Vec<_>>();
        workflow::ensure_chain_order(&steps)?;

        let status = workflow::derive_status(&steps);

        Ok(Self {
            id,
            employee_id: input.employee_id,
            company_id: input.company_id,
            original_amount: input.amount,
            original_currency: input.currency,
            converted_amount: conversion.converted_amount,
            company_currency: conversion.to.clone(),
            exchange_rate: conversion.exchange_rate,
            category: normalize_category(&input.category),
            description: input.description.trim().to_string(),
            expense_date: input.expense_date,
            receipt_url: input.receipt_url,
            status,
            final_comments: None,
            steps,
            version: 1,
            submitted_at: now,
            updated_at: now,
        })
    }

    pub fn pending_step_for(&self, approver: &UserId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.is_pending() && &step.approver_id == approver)
    }

    pub fn has_approver(&self, user: &UserId) -> bool {
        self.steps.iter().any(|step| &step.approver_id == user)
    }

    pub fn count_steps(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|step| step.status == status).count()
    }
}

/// `"office supplies"` -> `"OFFICE_SUPPLIES"`.
pub fn normalize_category(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join("_").to_ascii_uppercase()
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (date part is kept).
pub fn parse_expense_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}
