use chrono::Utc;

use expensa_core::auth::hash_password;
use expensa_core::currency::CurrencyCode;
use expensa_core::domain::company::{Company, CompanyId};
use expensa_core::domain::user::{Role, User, UserId};

use crate::connection::DbPool;
use crate::repositories::{
    CompanyRepository, RepositoryError, SqlCompanyRepository, SqlUserRepository, UserRepository,
};

pub const DEMO_COMPANY_ID: &str = "CMP-demo";
pub const DEMO_COMPANY_NAME: &str = "Test Company";
pub const DEMO_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy)]
pub struct DemoAccount {
    pub id: &'static str,
    pub name: &'static str,
    pub email: &'static str,
    pub password: &'static str,
    pub role: Role,
    pub manager: Option<&'static str>,
}

/// Admin first: it is created together with the company.
pub const DEMO_ACCOUNTS: &[DemoAccount] = &[
    DemoAccount {
        id: "USR-demo-admin",
        name: "Admin User",
        email: "admin@test.com",
        password: "admin123",
        role: Role::Admin,
        manager: None,
    },
    DemoAccount {
        id: "USR-demo-manager",
        name: "Morgan Manager",
        email: "manager@test.com",
        password: "manager123",
        role: Role::Manager,
        manager: None,
    },
    DemoAccount {
        id: "USR-demo-employee",
        name: "Evan Employee",
        email: "employee@test.com",
        password: "employee123",
        role: Role::Employee,
        manager: Some("USR-demo-manager"),
    },
];

/// Demo company with one admin, one manager, and one employee reporting to
/// the manager. Loading is idempotent.
pub struct DemoSeed;

impl DemoSeed {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let companies = SqlCompanyRepository::new(pool.clone());
        if companies.find_by_id(&CompanyId(DEMO_COMPANY_ID.to_string())).await?.is_some() {
            tracing::info!(event_name = "db.seed.skipped", company_id = DEMO_COMPANY_ID);
            return Ok(SeedResult { created: false, accounts: DEMO_ACCOUNTS.to_vec() });
        }

        let now = Utc::now();
        let default_currency = CurrencyCode::parse(DEMO_CURRENCY)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let company = Company {
            id: CompanyId(DEMO_COMPANY_ID.to_string()),
            name: DEMO_COMPANY_NAME.to_string(),
            default_currency,
            admin_id: None,
            created_at: now,
            updated_at: now,
        };

        let mut accounts = DEMO_ACCOUNTS.iter();
        let Some(admin) = accounts.next() else {
            return Ok(SeedResult { created: false, accounts: Vec::new() });
        };
        companies.register(company, demo_user(admin)?).await?;

        let users = SqlUserRepository::new(pool.clone());
        for account in accounts {
            users.create(demo_user(account)?).await?;
        }

        tracing::info!(
            event_name = "db.seed.loaded",
            company_id = DEMO_COMPANY_ID,
            accounts = DEMO_ACCOUNTS.len()
        );
        Ok(SeedResult { created: true, accounts: DEMO_ACCOUNTS.to_vec() })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let company_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM company WHERE id = ?1 AND admin_id = ?2)")
                .bind(DEMO_COMPANY_ID)
                .bind(DEMO_ACCOUNTS[0].id)
                .fetch_one(pool)
                .await?;
        checks.push(("company".to_string(), company_exists == 1));

        for account in DEMO_ACCOUNTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM app_user
                               WHERE id = ?1 AND email = ?2 AND role = ?3 AND company_id = ?4
                                 AND IFNULL(manager_id, '') = IFNULL(?5, ''))",
            )
            .bind(account.id)
            .bind(account.email)
            .bind(account.role.as_str())
            .bind(DEMO_COMPANY_ID)
            .bind(account.manager)
            .fetch_one(pool)
            .await?;
            checks.push((format!("user:{}", account.email), present == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the demo company; users, expenses, and steps cascade.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM company WHERE id = ?").bind(DEMO_COMPANY_ID).execute(pool).await?;
        Ok(())
    }
}

fn demo_user(account: &DemoAccount) -> Result<User, RepositoryError> {
    let now = Utc::now();
    let password_hash =
        hash_password(account.password).map_err(|e| RepositoryError::Decode(e.to_string()))?;
    Ok(User {
        id: UserId(account.id.to_string()),
        company_id: CompanyId(DEMO_COMPANY_ID.to_string()),
        name: account.name.to_string(),
        email: account.email.to_string(),
        password_hash,
        role: account.role,
        manager_id: account.manager.map(|id| UserId(id.to_string())),
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

#[derive(Debug)]
pub struct SeedResult {
    pub created: bool,
    pub accounts: Vec<DemoAccount>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn admin_account_comes_first() {
        assert_eq!(DEMO_ACCOUNTS[0].role, Role::Admin);
        assert!(DEMO_ACCOUNTS.iter().skip(1).all(|account| account.role != Role::Admin));
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = DemoSeed::load(&pool).await.expect("first load");
        let second = DemoSeed::load(&pool).await.expect("second load");

        assert!(first.created);
        assert!(!second.created);
        let verification = DemoSeed::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "checks: {:?}", verification.checks);
    }

    #[tokio::test]
    async fn clean_removes_company_and_users() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoSeed::load(&pool).await.expect("load");

        DemoSeed::clean(&pool).await.expect("clean");

        let verification = DemoSeed::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        assert!(verification.checks.iter().all(|(_, ok)| !ok));
    }
}
