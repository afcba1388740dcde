use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::expense::ExpenseId;
use crate::domain::user::{Role, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn generate() -> Self {
        Self(format!("STP-{}", uuid::Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub expense_id: ExpenseId,
    pub step_number: u32,
    pub approver_id: UserId,
    pub approver_role: Role,
    pub status: StepStatus,
    pub comments: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalStep {
    pub fn pending(
        expense_id: ExpenseId,
        step_number: u32,
        approver_id: UserId,
        approver_role: Role,
    ) -> Self {
        Self {
            id: StepId::generate(),
            expense_id,
            step_number,
            approver_id,
            approver_role,
            status: StepStatus::Pending,
            comments: None,
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }

    pub(crate) fn resolve(
        &mut self,
        status: StepStatus,
        comments: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.status = status;
        self.comments = comments;
        self.decided_at = Some(at);
    }
}
