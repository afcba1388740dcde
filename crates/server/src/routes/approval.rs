use std::str::FromStr;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tracing::info;

use expensa_core::domain::expense::{Expense, ExpenseId};
use expensa_core::domain::user::Role;
use expensa_core::workflow::{self, Decision, OverrideOutcome};
use expensa_db::repositories::{ExpenseOrder, ExpenseScope};

use crate::auth::CurrentUser;
use crate::dto::{
    present, ApproveRequest, ExpenseList, MessageWithExpense, OverrideRequest, RejectRequest,
};
use crate::error::ApiError;
use crate::routes::{expense_view, expense_views};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pending", get(pending))
        .route("/history", get(history))
        .route("/{expense_id}/approve", post(approve))
        .route("/{expense_id}/reject", post(reject))
        .route("/{expense_id}/override", post(override_decision))
}

/// Open expenses waiting on the caller's step, newest submission first.
async fn pending(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<ExpenseList>, ApiError> {
    let reviewer = current.require_reviewer()?;
    let expenses = state
        .expenses
        .list(&ExpenseScope::AwaitingDecisionBy(reviewer.id.clone()), ExpenseOrder::NewestSubmitted)
        .await?;
    Ok(Json(ExpenseList { expenses: expense_views(&state, &expenses).await? }))
}

/// Managers see every expense they were asked to review; admins see the
/// whole company. Most recently updated first.
async fn history(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<ExpenseList>, ApiError> {
    let reviewer = current.require_reviewer()?;
    let scope = match reviewer.role {
        Role::Admin => ExpenseScope::Company(reviewer.company_id.clone()),
        _ => ExpenseScope::AssignedTo(reviewer.id.clone()),
    };
    let expenses = state.expenses.list(&scope, ExpenseOrder::RecentlyUpdated).await?;
    Ok(Json(ExpenseList { expenses: expense_views(&state, &expenses).await? }))
}

async fn approve(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(expense_id): Path<String>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<MessageWithExpense>, ApiError> {
    current.require_reviewer()?;
    let comments = body.and_then(|Json(body)| body.comments);
    decide(&state, &current, expense_id, Decision::Approve { comments }).await
}

async fn reject(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(expense_id): Path<String>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<MessageWithExpense>, ApiError> {
    current.require_reviewer()?;
    let comments = body
        .and_then(|Json(body)| body.comments)
        .filter(|comments| !comments.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Please provide rejection comments"))?;
    decide(&state, &current, expense_id, Decision::Reject { comments }).await
}

async fn decide(
    state: &AppState,
    current: &CurrentUser,
    expense_id: String,
    decision: Decision,
) -> Result<Json<MessageWithExpense>, ApiError> {
    let actor = &current.0;
    let (verb, done) = match decision {
        Decision::Approve { .. } => ("approve", "approved"),
        Decision::Reject { .. } => ("reject", "rejected"),
    };
    let mut expense = load(state, expense_id).await?;

    let transition = workflow::decide(&mut expense, &actor.id, decision, Utc::now()).map_err(|error| {
        info!(
            event_name = "approval.decision.refused",
            expense_id = %expense.id,
            actor_id = %actor.id,
            reason = %error,
            "decision refused"
        );
        ApiError::forbidden(format!(
            "You are not authorized to {verb} this expense or it has already been processed"
        ))
    })?;
    expense.version = state.expenses.save_transition(&expense).await?;

    info!(
        event_name = "approval.step.decided",
        expense_id = %transition.expense_id,
        actor_id = %actor.id,
        step_number = transition.step_number,
        step_status = transition.step_status.as_str(),
        from = transition.from.as_str(),
        to = transition.to.as_str(),
        "approval step decided"
    );

    Ok(Json(MessageWithExpense {
        message: format!("Expense {done} successfully"),
        expense: expense_view(state, &expense).await?,
    }))
}

async fn override_decision(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(expense_id): Path<String>,
    body: Option<Json<OverrideRequest>>,
) -> Result<Json<MessageWithExpense>, ApiError> {
    let admin = current.require_admin()?;
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let outcome = present(body.action.as_deref())
        .and_then(|action| OverrideOutcome::from_str(action).ok())
        .ok_or_else(|| ApiError::validation("Please provide valid action (approve/reject)"))?;

    let mut expense = load(&state, expense_id).await?;
    if expense.company_id != admin.company_id {
        return Err(ApiError::forbidden("Not authorized to override this expense"));
    }

    let transition =
        workflow::override_expense(&mut expense, outcome, body.comments.as_deref(), Utc::now());
    expense.version = state.expenses.save_transition(&expense).await?;

    info!(
        event_name = "approval.override.applied",
        expense_id = %transition.expense_id,
        admin_id = %admin.id,
        outcome = outcome.past_tense(),
        from = transition.from.as_str(),
        to = transition.to.as_str(),
        resolved_steps = ?transition.resolved_steps,
        "admin override applied"
    );

    Ok(Json(MessageWithExpense {
        message: format!("Expense {} successfully (Admin Override)", outcome.past_tense()),
        expense: expense_view(&state, &expense).await?,
    }))
}

async fn load(state: &AppState, expense_id: String) -> Result<Expense, ApiError> {
    state
        .expenses
        .find_by_id(&ExpenseId(expense_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Expense not found"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::{json, Value};

    use expensa_core::domain::expense::ExpenseId;
    use expensa_core::workflow::{self, Decision};

    use crate::routes::test_support::TestApp;

    async fn submitted_by_employee(app: &TestApp) -> String {
        let (status, body) = app
            .post(
                "/api/expenses",
                Some("emp"),
                json!({"amount": "80", "currency": "EUR", "category": "hotel", "description": "Night in Lyon", "date": "2026-08-30"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["expense"]["id"].as_str().expect("id").to_string()
    }

    fn step_statuses(expense: &Value) -> Vec<String> {
        expense["approvalSteps"]
            .as_array()
            .map(|steps| {
                steps.iter().map(|step| step["status"].as_str().unwrap_or("").to_string()).collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn manager_then_admin_approval_completes_the_chain() {
        let app = TestApp::new().await;
        let id = submitted_by_employee(&app).await;

        let (status, body) =
            app.post(&format!("/api/approval/{id}/approve"), Some("mgr"), json!({"comments": "fine"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Expense approved successfully");
        assert_eq!(body["expense"]["status"], "IN_REVIEW");

        let (status, body) = app.post(&format!("/api/approval/{id}/approve"), Some("adm"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expense"]["status"], "APPROVED");
        assert_eq!(step_statuses(&body["expense"]), vec!["APPROVED", "APPROVED"]);
    }

    #[tokio::test]
    async fn manager_rejection_is_final_and_leaves_admin_step() {
        let app = TestApp::new().await;
        let id = submitted_by_employee(&app).await;

        let (status, body) = app.post(&format!("/api/approval/{id}/reject"), Some("mgr"), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please provide rejection comments");

        let (status, body) = app
            .post(&format!("/api/approval/{id}/reject"), Some("mgr"), json!({"comments": "No receipt"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expense"]["status"], "REJECTED");
        assert_eq!(body["expense"]["finalComments"], "No receipt");
        assert_eq!(step_statuses(&body["expense"]), vec!["REJECTED", "PENDING"]);

        let (status, _) = app.post(&format!("/api/approval/{id}/approve"), Some("adm"), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn non_assigned_reviewers_and_employees_are_refused() {
        let app = TestApp::new().await;
        let id = submitted_by_employee(&app).await;

        let (status, _) = app.post(&format!("/api/approval/{id}/approve"), Some("emp"), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) =
            app.post(&format!("/api/approval/{id}/approve"), Some("other-adm"), json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) =
            app.post("/api/approval/EXP-nope/approve", Some("mgr"), json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Expense not found");

        let (_, body) = app.get(&format!("/api/expenses/{id}"), Some("emp")).await;
        assert_eq!(body["expense"]["status"], "PENDING");
        assert_eq!(body["expense"]["version"], 1);
    }

    #[tokio::test]
    async fn override_reject_resolves_remaining_steps() {
        let app = TestApp::new().await;
        let id = submitted_by_employee(&app).await;
        app.post(&format!("/api/approval/{id}/approve"), Some("mgr"), json!({})).await;

        let (status, body) = app
            .post(&format!("/api/approval/{id}/override"), Some("adm"), json!({"action": "reject", "comments": "Over budget"}))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Expense rejected successfully (Admin Override)");
        assert_eq!(body["expense"]["status"], "REJECTED");
        assert_eq!(body["expense"]["finalComments"], "Admin Override: Over budget");
        assert_eq!(step_statuses(&body["expense"]), vec!["APPROVED", "REJECTED"]);
        assert_eq!(body["expense"]["approvalSteps"][1]["comments"], "Admin Override: Over budget");
    }

    #[tokio::test]
    async fn override_requires_admin_valid_action_and_same_company() {
        let app = TestApp::new().await;
        let id = submitted_by_employee(&app).await;
        let uri = format!("/api/approval/{id}/override");

        assert_eq!(app.post(&uri, Some("mgr"), json!({"action": "approve"})).await.0, StatusCode::FORBIDDEN);
        let (status, body) = app.post(&uri, Some("adm"), json!({"action": "maybe"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please provide valid action (approve/reject)");
        assert_eq!(
            app.post(&uri, Some("other-adm"), json!({"action": "approve"})).await.0,
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn pending_and_history_follow_decisions() {
        let app = TestApp::new().await;
        let first = submitted_by_employee(&app).await;
        let second = submitted_by_employee(&app).await;

        let (_, pending) = app.get("/api/approval/pending", Some("mgr")).await;
        assert_eq!(pending["expenses"].as_array().map(Vec::len), Some(2));

        app.post(&format!("/api/approval/{first}/approve"), Some("mgr"), json!({})).await;

        let (_, pending) = app.get("/api/approval/pending", Some("mgr")).await;
        assert_eq!(pending["expenses"].as_array().map(Vec::len), Some(1));
        assert_eq!(pending["expenses"][0]["id"], second.as_str());
        let (_, history) = app.get("/api/approval/history", Some("mgr")).await;
        assert_eq!(history["expenses"].as_array().map(Vec::len), Some(2));
        assert_eq!(history["expenses"][0]["id"], first.as_str());
        let (_, admin_history) = app.get("/api/approval/history", Some("adm")).await;
        assert_eq!(admin_history["expenses"].as_array().map(Vec::len), Some(2));

        assert_eq!(app.get("/api/approval/pending", Some("emp")).await.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn stale_decision_returns_conflict() {
        let app = TestApp::new().await;
        let id = submitted_by_employee(&app).await;
        let expenses = Arc::clone(&app.state.expenses);

        // A concurrent writer read version 1 and commits first.
        let mut concurrent = expenses.find_by_id(&ExpenseId(id.clone())).await.expect("find").expect("exists");
        let stale_copy = concurrent.clone();
        let admin = concurrent.steps[1].approver_id.clone();
        workflow::decide(&mut concurrent, &admin, Decision::Approve { comments: None }, Utc::now())
            .expect("admin approves");
        expenses.save_transition(&concurrent).await.expect("first write");

        let mut late = stale_copy;
        let manager = late.steps[0].approver_id.clone();
        workflow::decide(&mut late, &manager, Decision::Approve { comments: None }, Utc::now())
            .expect("manager approves");
        let error = expenses.save_transition(&late).await.expect_err("stale");
        assert!(matches!(error, expensa_db::repositories::RepositoryError::Conflict(_)));

        let (status, body) = app.post(&format!("/api/approval/{id}/approve"), Some("mgr"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expense"]["status"], "APPROVED");
        assert_eq!(body["expense"]["version"], 3);
    }
}
