use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use expensa_core::domain::company::{Company, CompanyId};
use expensa_core::domain::expense::{Expense, ExpenseId};
use expensa_core::domain::user::{Role, User, UserId, UserSummary};

use super::{
    stale_version, CompanyRepository, ExpenseOrder, ExpenseRepository, ExpenseScope,
    RepositoryError, UserRepository,
};

/// Company store that shares its user table with an [`InMemoryUserRepository`]
/// so registration stays atomic.
pub struct InMemoryCompanyRepository {
    companies: RwLock<HashMap<String, Company>>,
    users: Arc<InMemoryUserRepository>,
}

impl InMemoryCompanyRepository {
    pub fn new(users: Arc<InMemoryUserRepository>) -> Self {
        Self { companies: RwLock::new(HashMap::new()), users }
    }
}

#[async_trait::async_trait]
impl CompanyRepository for InMemoryCompanyRepository {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let companies = self.companies.read().await;
        Ok(companies.get(&id.0).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Company>, RepositoryError> {
        let companies = self.companies.read().await;
        Ok(companies.values().find(|company| company.name == name).cloned())
    }

    async fn register(&self, mut company: Company, admin: User) -> Result<(), RepositoryError> {
        let mut companies = self.companies.write().await;
        if companies.values().any(|existing| existing.name == company.name) {
            return Err(RepositoryError::Conflict(format!(
                "company `{}` already exists",
                company.name
            )));
        }

        company.admin_id = Some(admin.id.clone());
        self.users.create(admin).await?;
        companies.insert(company.id.0.clone(), company);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn create(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(RepositoryError::Conflict(format!(
                "a user with email `{}` already exists",
                user.email
            )));
        }
        users.insert(user.id.0.clone(), user);
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        if let Some(stored) = users.get_mut(&user.id.0) {
            stored.name = user.name.clone();
            stored.role = user.role;
            stored.manager_id = user.manager_id.clone();
            stored.is_active = user.is_active;
            stored.updated_at = user.updated_at;
        }
        Ok(())
    }

    async fn list_by_company(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut listed: Vec<User> =
            users.values().filter(|user| &user.company_id == company_id).cloned().collect();
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(listed)
    }

    async fn list_reviewers(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut listed: Vec<User> = users
            .values()
            .filter(|user| &user.company_id == company_id && user.is_active && user.role.can_review())
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(listed)
    }

    async fn find_company_admin(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|user| {
                &user.company_id == company_id && user.is_active && user.role == Role::Admin
            })
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn summaries(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserSummary>, RepositoryError> {
        let users = self.users.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| users.get(&id.0).map(|user| (id.clone(), user.summary())))
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryExpenseRepository {
    expenses: RwLock<HashMap<String, Expense>>,
}

fn in_scope(expense: &Expense, scope: &ExpenseScope) -> bool {
    match scope {
        ExpenseScope::SubmittedBy(employee_id) => &expense.employee_id == employee_id,
        ExpenseScope::AssignedTo(approver_id) => expense.has_approver(approver_id),
        ExpenseScope::AwaitingDecisionBy(approver_id) => {
            !expense.status.is_final() && expense.pending_step_for(approver_id).is_some()
        }
        ExpenseScope::Company(company_id) => &expense.company_id == company_id,
    }
}

#[async_trait::async_trait]
impl ExpenseRepository for InMemoryExpenseRepository {
    async fn create(&self, expense: &Expense) -> Result<(), RepositoryError> {
        let mut expenses = self.expenses.write().await;
        if expenses.contains_key(&expense.id.0) {
            return Err(RepositoryError::Conflict(format!("expense `{}` already exists", expense.id)));
        }
        expenses.insert(expense.id.0.clone(), expense.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let expenses = self.expenses.read().await;
        Ok(expenses.get(&id.0).cloned())
    }

    async fn list(
        &self,
        scope: &ExpenseScope,
        order: ExpenseOrder,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let expenses = self.expenses.read().await;
        let mut listed: Vec<Expense> =
            expenses.values().filter(|expense| in_scope(expense, scope)).cloned().collect();
        listed.sort_by(|a, b| {
            let (left, right) = match order {
                ExpenseOrder::NewestSubmitted => (a.submitted_at, b.submitted_at),
                ExpenseOrder::RecentlyUpdated => (a.updated_at, b.updated_at),
            };
            right.cmp(&left).then_with(|| b.id.0.cmp(&a.id.0))
        });
        Ok(listed)
    }

    async fn count_pending_for(&self, approver_id: &UserId) -> Result<u64, RepositoryError> {
        let expenses = self.expenses.read().await;
        let scope = ExpenseScope::AwaitingDecisionBy(approver_id.clone());
        Ok(expenses.values().filter(|expense| in_scope(expense, &scope)).count() as u64)
    }

    async fn save_transition(&self, expense: &Expense) -> Result<i64, RepositoryError> {
        let mut expenses = self.expenses.write().await;
        let Some(stored) = expenses.get_mut(&expense.id.0) else {
            return Err(stale_version(expense));
        };
        if stored.version != expense.version {
            return Err(stale_version(expense));
        }

        let next_version = expense.version + 1;
        stored.status = expense.status;
        stored.final_comments = expense.final_comments.clone();
        stored.updated_at = expense.updated_at;
        stored.version = next_version;
        for step in &mut stored.steps {
            if let Some(updated) = expense.steps.iter().find(|candidate| candidate.id == step.id) {
                step.status = updated.status;
                step.comments = updated.comments.clone();
                step.decided_at = updated.decided_at;
            }
        }
        Ok(next_version)
    }
}
