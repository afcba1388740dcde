//! Wire shapes. Field names are camelCase; enum values keep their
//! SCREAMING_SNAKE_CASE serde form.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use expensa_core::currency::{Conversion, CurrencyCode};
use expensa_core::domain::approval::{ApprovalStep, StepStatus};
use expensa_core::domain::expense::{Expense, ExpenseStatus};
use expensa_core::domain::user::{Role, User, UserId, UserSummary};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub company_id: String,
    pub manager_id: Option<UserId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            company_id: user.company_id.0.clone(),
            manager_id: user.manager_id.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub id: String,
    pub step_number: u32,
    pub approver_id: UserId,
    pub approver: Option<UserSummary>,
    pub approver_role: Role,
    pub status: StepStatus,
    pub comments: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseView {
    pub id: String,
    pub employee_id: UserId,
    pub employee: Option<UserSummary>,
    pub company_id: String,
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
    pub version: i64,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approval_steps: Vec<StepView>,
}

impl ExpenseView {
    /// `people` supplies the employee and approver summaries; unknown ids
    /// render as `null`.
    pub fn build(expense: &Expense, people: &HashMap<UserId, UserSummary>) -> Self {
        Self {
            id: expense.id.0.clone(),
            employee_id: expense.employee_id.clone(),
            employee: people.get(&expense.employee_id).cloned(),
            company_id: expense.company_id.0.clone(),
            original_amount: expense.original_amount,
            original_currency: expense.original_currency.clone(),
            converted_amount: expense.converted_amount,
            company_currency: expense.company_currency.clone(),
            exchange_rate: expense.exchange_rate,
            category: expense.category.clone(),
            description: expense.description.clone(),
            expense_date: expense.expense_date,
            receipt_url: expense.receipt_url.clone(),
            status: expense.status,
            final_comments: expense.final_comments.clone(),
            version: expense.version,
            submitted_at: expense.submitted_at,
            updated_at: expense.updated_at,
            approval_steps: expense.steps.iter().map(|step| step_view(step, people)).collect(),
        }
    }
}

fn step_view(step: &ApprovalStep, people: &HashMap<UserId, UserSummary>) -> StepView {
    StepView {
        id: step.id.0.clone(),
        step_number: step.step_number,
        approver_id: step.approver_id.clone(),
        approver: people.get(&step.approver_id).cloned(),
        approver_role: step.approver_role,
        status: step.status,
        comments: step.comments.clone(),
        approved_at: step.decided_at,
    }
}

/// Every user id an expense view needs resolved.
pub fn referenced_users<'a>(expenses: impl IntoIterator<Item = &'a Expense>) -> Vec<UserId> {
    let mut ids = Vec::new();
    for expense in expenses {
        ids.push(expense.employee_id.clone());
        ids.extend(expense.steps.iter().map(|step| step.approver_id.clone()));
    }
    ids.sort();
    ids.dedup();
    ids
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionView {
    pub amount: Decimal,
    pub converted_amount: Decimal,
    pub from_currency: CurrencyCode,
    pub to_currency: CurrencyCode,
    pub exchange_rate: Decimal,
}

impl From<Conversion> for ConversionView {
    fn from(conversion: Conversion) -> Self {
        Self {
            amount: conversion.amount,
            converted_amount: conversion.converted_amount,
            from_currency: conversion.from,
            to_currency: conversion.to,
            exchange_rate: conversion.exchange_rate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageWithExpense {
    pub message: String,
    pub expense: ExpenseView,
}

#[derive(Debug, Serialize)]
pub struct ExpenseList {
    pub expenses: Vec<ExpenseView>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub message: String,
    pub token: String,
    pub user: UserView,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCompanyRequest {
    pub company_name: Option<String>,
    pub admin_name: Option<String>,
    pub admin_email: Option<String>,
    pub password: Option<String>,
    pub default_currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub manager_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub manager_id: Option<String>,
    pub is_active: Option<bool>,
}

/// JSON submission body. Multipart submissions carry the same field names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExpenseRequest {
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub receipt_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OverrideRequest {
    pub action: Option<String>,
    pub comments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub amount: Option<Decimal>,
    pub from_currency: Option<String>,
    pub to_currency: Option<String>,
}

/// Trimmed, non-empty text or `None`.
pub fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
