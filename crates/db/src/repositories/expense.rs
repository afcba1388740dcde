use std::collections::HashMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Sqlite};

use expensa_core::domain::approval::{ApprovalStep, StepId, StepStatus};
use expensa_core::domain::company::CompanyId;
use expensa_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use expensa_core::domain::user::UserId;

use super::rows::{
    column, currency, date, decimal, encode_date, encode_timestamp, optional_timestamp, role,
    timestamp,
};
use super::{stale_version, ExpenseOrder, ExpenseRepository, ExpenseScope, RepositoryError};
use crate::DbPool;

const EXPENSE_COLUMNS: &str = "e.id, e.employee_id, e.company_id, e.original_amount, \
    e.original_currency, e.converted_amount, e.company_currency, e.exchange_rate, e.category, \
    e.description, e.expense_date, e.receipt_url, e.status, e.final_comments, e.version, \
    e.submitted_at, e.updated_at";

const OPEN_STATUSES: &str = "('pending', 'in_review')";

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn attach_steps(&self, mut expenses: Vec<Expense>) -> Result<Vec<Expense>, RepositoryError> {
        if expenses.is_empty() {
            return Ok(expenses);
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, expense_id, step_number, approver_id, approver_role, status, comments,
                    decided_at
             FROM approval_step WHERE expense_id IN (",
        );
        let mut separated = query.separated(", ");
        for expense in &expenses {
            separated.push_bind(expense.id.0.clone());
        }
        separated.push_unseparated(") ORDER BY expense_id, step_number");

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut by_expense: HashMap<String, Vec<ApprovalStep>> = HashMap::new();
        for row in &rows {
            let step = row_to_step(row)?;
            by_expense.entry(step.expense_id.0.clone()).or_default().push(step);
        }

        for expense in &mut expenses {
            expense.steps = by_expense.remove(&expense.id.0).unwrap_or_default();
        }
        Ok(expenses)
    }
}

fn parse_expense_status(raw: &str) -> Result<ExpenseStatus, RepositoryError> {
    ExpenseStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status `{raw}`")))
}

fn parse_step_status(raw: &str) -> Result<StepStatus, RepositoryError> {
    StepStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{raw}`")))
}

fn row_to_expense(row: &SqliteRow) -> Result<Expense, RepositoryError> {
    let status: String = column(row, "status")?;
    Ok(Expense {
        id: ExpenseId(column(row, "id")?),
        employee_id: UserId(column(row, "employee_id")?),
        company_id: CompanyId(column(row, "company_id")?),
        original_amount: decimal(row, "original_amount")?,
        original_currency: currency(row, "original_currency")?,
        converted_amount: decimal(row, "converted_amount")?,
        company_currency: currency(row, "company_currency")?,
        exchange_rate: decimal(row, "exchange_rate")?,
        category: column(row, "category")?,
        description: column(row, "description")?,
        expense_date: date(row, "expense_date")?,
        receipt_url: column(row, "receipt_url")?,
        status: parse_expense_status(&status)?,
        final_comments: column(row, "final_comments")?,
        steps: Vec::new(),
        version: column(row, "version")?,
        submitted_at: timestamp(row, "submitted_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let status: String = column(row, "status")?;
    let step_number: i64 = column(row, "step_number")?;
    Ok(ApprovalStep {
        id: StepId(column(row, "id")?),
        expense_id: ExpenseId(column(row, "expense_id")?),
        step_number: u32::try_from(step_number)
            .map_err(|_| RepositoryError::Decode(format!("step_number {step_number} out of range")))?,
        approver_id: UserId(column(row, "approver_id")?),
        approver_role: role(row, "approver_role")?,
        status: parse_step_status(&status)?,
        comments: column(row, "comments")?,
        decided_at: optional_timestamp(row, "decided_at")?,
    })
}

fn push_scope(query: &mut QueryBuilder<'_, Sqlite>, scope: &ExpenseScope) {
    match scope {
        ExpenseScope::SubmittedBy(employee_id) => {
            query.push(" WHERE e.employee_id = ").push_bind(employee_id.0.clone());
        }
        ExpenseScope::AssignedTo(approver_id) => {
            query
                .push(
                    " WHERE EXISTS (SELECT 1 FROM approval_step s
                                    WHERE s.expense_id = e.id AND s.approver_id = ",
                )
                .push_bind(approver_id.0.clone())
                .push(")");
        }
        ExpenseScope::AwaitingDecisionBy(approver_id) => {
            query
                .push(format!(
                    " WHERE e.status IN {OPEN_STATUSES}
                      AND EXISTS (SELECT 1 FROM approval_step s
                                  WHERE s.expense_id = e.id AND s.status = 'pending'
                                    AND s.approver_id = "
                ))
                .push_bind(approver_id.0.clone())
                .push(")");
        }
        ExpenseScope::Company(company_id) => {
            query.push(" WHERE e.company_id = ").push_bind(company_id.0.clone());
        }
    }
}

#[async_trait::async_trait]
impl ExpenseRepository for SqlExpenseRepository {
    async fn create(&self, expense: &Expense) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO expense (id, employee_id, company_id, original_amount, original_currency,
                                  converted_amount, company_currency, exchange_rate, category,
                                  description, expense_date, receipt_url, status, final_comments,
                                  version, submitted_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&expense.id.0)
        .bind(&expense.employee_id.0)
        .bind(&expense.company_id.0)
        .bind(expense.original_amount.to_string())
        .bind(expense.original_currency.as_str())
        .bind(expense.converted_amount.to_string())
        .bind(expense.company_currency.as_str())
        .bind(expense.exchange_rate.to_string())
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(encode_date(&expense.expense_date))
        .bind(&expense.receipt_url)
        .bind(expense.status.as_str())
        .bind(&expense.final_comments)
        .bind(expense.version)
        .bind(encode_timestamp(&expense.submitted_at))
        .bind(encode_timestamp(&expense.updated_at))
        .execute(&mut *tx)
        .await?;

        for step in &expense.steps {
            sqlx::query(
                "INSERT INTO approval_step (id, expense_id, step_number, approver_id,
                                            approver_role, status, comments, decided_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(&expense.id.0)
            .bind(i64::from(step.step_number))
            .bind(&step.approver_id.0)
            .bind(step.approver_role.as_str())
            .bind(step.status.as_str())
            .bind(&step.comments)
            .bind(step.decided_at.as_ref().map(encode_timestamp))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expense e WHERE e.id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expense = row_to_expense(&row)?;
        Ok(self.attach_steps(vec![expense]).await?.pop())
    }

    async fn list(
        &self,
        scope: &ExpenseScope,
        order: ExpenseOrder,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {EXPENSE_COLUMNS} FROM expense e"));
        push_scope(&mut query, scope);
        query.push(match order {
            ExpenseOrder::NewestSubmitted => " ORDER BY e.submitted_at DESC, e.id DESC",
            ExpenseOrder::RecentlyUpdated => " ORDER BY e.updated_at DESC, e.id DESC",
        });

        let rows = query.build().fetch_all(&self.pool).await?;
        let expenses = rows.iter().map(row_to_expense).collect::<Result<Vec<_>, _>>()?;
        self.attach_steps(expenses).await
    }

    async fn count_pending_for(&self, approver_id: &UserId) -> Result<u64, RepositoryError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM expense e");
        push_scope(&mut query, &ExpenseScope::AwaitingDecisionBy(approver_id.clone()));

        let count = query.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn save_transition(&self, expense: &Expense) -> Result<i64, RepositoryError> {
        let next_version = expense.version + 1;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE expense
             SET status = ?, final_comments = ?, version = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(expense.status.as_str())
        .bind(&expense.final_comments)
        .bind(next_version)
        .bind(encode_timestamp(&expense.updated_at))
        .bind(&expense.id.0)
        .bind(expense.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::debug!(
                event_name = "db.expense.stale_version",
                expense_id = %expense.id,
                version = expense.version,
                "expense transition lost a concurrent update"
            );
            return Err(stale_version(expense));
        }

        for step in &expense.steps {
            sqlx::query(
                "UPDATE approval_step SET status = ?, comments = ?, decided_at = ?
                 WHERE id = ? AND expense_id = ?",
            )
            .bind(step.status.as_str())
            .bind(&step.comments)
            .bind(step.decided_at.as_ref().map(encode_timestamp))
            .bind(&step.id.0)
            .bind(&expense.id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(next_version)
    }
}
