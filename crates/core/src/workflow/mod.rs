//! Sequential approval workflow for submitted expenses.
//!
//! An expense carries an ordered chain of [`ApprovalStep`]s. Each assigned
//! approver resolves their own pending step; the expense status follows the
//! chain (`Pending -> InReview -> Approved | Rejected`). An admin override
//! resolves every outstanding step in one go, regardless of order.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::{ApprovalStep, StepStatus};
use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use crate::domain::user::{Role, UserId};
use crate::errors::DomainError;

pub const OVERRIDE_MARKER: &str = "Admin Override";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step_number: u32,
    pub approver_id: UserId,
    pub approver_role: Role,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve { comments: Option<String> },
    Reject { comments: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideOutcome {
    Approve,
    Reject,
}

impl OverrideOutcome {
    fn step_status(self) -> StepStatus {
        match self {
            Self::Approve => StepStatus::Approved,
            Self::Reject => StepStatus::Rejected,
        }
    }

    fn expense_status(self) -> ExpenseStatus {
        match self {
            Self::Approve => ExpenseStatus::Approved,
            Self::Reject => ExpenseStatus::Rejected,
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Approve => "approved",
            Self::Reject => "rejected",
        }
    }
}

impl FromStr for OverrideOutcome {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported override action `{other}` (expected approve|reject)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("user `{actor}` holds no pending approval step on expense `{expense_id}`")]
    NotAssignedApprover { expense_id: ExpenseId, actor: UserId },
    #[error("expense `{expense_id}` is already {status:?}")]
    ExpenseFinalized { expense_id: ExpenseId, status: ExpenseStatus },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepTransition {
    pub expense_id: ExpenseId,
    pub step_number: u32,
    pub step_status: StepStatus,
    pub from: ExpenseStatus,
    pub to: ExpenseStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OverrideTransition {
    pub expense_id: ExpenseId,
    pub outcome: OverrideOutcome,
    pub from: ExpenseStatus,
    pub to: ExpenseStatus,
    pub resolved_steps: Vec<u32>,
}

/// Manager first (when the employee has one), then the company admin. A
/// manager who is also the admin is asked once.
pub fn plan_chain(manager_id: Option<&UserId>, company_admin_id: Option<&UserId>) -> Vec<PlannedStep> {
    let mut chain = Vec::with_capacity(2);

    if let Some(manager_id) = manager_id {
        chain.push(PlannedStep {
            step_number: 1,
            approver_id: manager_id.clone(),
            approver_role: Role::Manager,
        });
    }

    if let Some(admin_id) = company_admin_id {
        if manager_id != Some(admin_id) {
            chain.push(PlannedStep {
                step_number: chain.len() as u32 + 1,
                approver_id: admin_id.clone(),
                approver_role: Role::Admin,
            });
        }
    }

    chain
}

pub fn derive_status(steps: &[ApprovalStep]) -> ExpenseStatus {
    if steps.iter().any(|step| step.status == StepStatus::Rejected) {
        return ExpenseStatus::Rejected;
    }
    if steps.iter().all(|step| step.status == StepStatus::Approved) {
        return ExpenseStatus::Approved;
    }
    if steps.iter().any(|step| step.status == StepStatus::Approved) {
        return ExpenseStatus::InReview;
    }
    ExpenseStatus::Pending
}

/// Step numbers must run 1..=N in storage order.
pub fn ensure_chain_order(steps: &[ApprovalStep]) -> Result<(), DomainError> {
    for (position, step) in steps.iter().enumerate() {
        let expected = position as u32 + 1;
        if step.step_number != expected {
            return Err(DomainError::InvariantViolation(format!(
                "approval step {} found where step {expected} was expected",
                step.step_number
            )));
        }
    }
    Ok(())
}

/// Resolves the actor's lowest-numbered pending step. On error the expense is
/// left untouched.
pub fn decide(
    expense: &mut Expense,
    actor: &UserId,
    decision: Decision,
    at: DateTime<Utc>,
) -> Result<StepTransition, WorkflowError> {
    if expense.status.is_final() {
        return Err(WorkflowError::ExpenseFinalized {
            expense_id: expense.id.clone(),
            status: expense.status,
        });
    }

    let index = expense
        .steps
        .iter()
        .position(|step| step.is_pending() && &step.approver_id == actor)
        .ok_or_else(|| WorkflowError::NotAssignedApprover {
            expense_id: expense.id.clone(),
            actor: actor.clone(),
        })?;

    let from = expense.status;
    let step_status = match decision {
        Decision::Approve { comments } => {
            let comments = comments.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
            expense.steps[index].resolve(StepStatus::Approved, comments, at);
            expense.status = match derive_status(&expense.steps) {
                ExpenseStatus::Approved => ExpenseStatus::Approved,
                _ => ExpenseStatus::InReview,
            };
            StepStatus::Approved
        }
        Decision::Reject { comments } => {
            let comments = comments.trim().to_string();
            expense.steps[index].resolve(StepStatus::Rejected, Some(comments.clone()), at);
            expense.status = ExpenseStatus::Rejected;
            expense.final_comments = Some(comments);
            StepStatus::Rejected
        }
    };
    expense.updated_at = at;

    Ok(StepTransition {
        expense_id: expense.id.clone(),
        step_number: expense.steps[index].step_number,
        step_status,
        from,
        to: expense.status,
    })
}

pub fn override_expense(
    expense: &mut Expense,
    outcome: OverrideOutcome,
    comments: Option<&str>,
    at: DateTime<Utc>,
) -> OverrideTransition {
    let annotated = override_comment(comments);
    let from = expense.status;

    let mut resolved_steps = Vec::new();
    for step in expense.steps.iter_mut().filter(|step| step.is_pending()) {
        step.resolve(outcome.step_status(), Some(annotated.clone()), at);
        resolved_steps.push(step.step_number);
    }

    expense.status = outcome.expense_status();
    expense.final_comments = Some(annotated);
    expense.updated_at = at;

    OverrideTransition {
        expense_id: expense.id.clone(),
        outcome,
        from,
        to: expense.status,
        resolved_steps,
    }
}

pub fn override_comment(comments: Option<&str>) -> String {
    match comments.map(str::trim).filter(|c| !c.is_empty()) {
        Some(comments) => format!("{OVERRIDE_MARKER}: {comments}"),
        None => OVERRIDE_MARKER.to_string(),
    }
}
