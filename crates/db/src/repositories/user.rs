use std::collections::HashMap;

use sqlx::sqlite::SqliteRow;
use sqlx::QueryBuilder;

use expensa_core::domain::company::CompanyId;
use expensa_core::domain::user::{User, UserId, UserSummary};

use super::rows::{column, encode_timestamp, role, timestamp};
use super::{conflict_from_unique, RepositoryError, UserRepository};
use crate::DbPool;

const USER_COLUMNS: &str = "id, company_id, name, email, password_hash, role, manager_id, \
                            is_active, created_at, updated_at";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let manager_id: Option<String> = column(row, "manager_id")?;
    Ok(User {
        id: UserId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        name: column(row, "name")?,
        email: column(row, "email")?,
        password_hash: column(row, "password_hash")?,
        role: role(row, "role")?,
        manager_id: manager_id.map(UserId),
        is_active: column(row, "is_active")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

pub(crate) async fn insert_user<'e, E>(executor: E, user: &User) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO app_user (id, company_id, name, email, password_hash, role, manager_id,
                               is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id.0)
    .bind(&user.company_id.0)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .bind(user.manager_id.as_ref().map(|id| id.0.as_str()))
    .bind(user.is_active)
    .bind(encode_timestamp(&user.created_at))
    .bind(encode_timestamp(&user.updated_at))
    .execute(executor)
    .await
    .map_err(|e| conflict_from_unique(e, format!("a user with email `{}` already exists", user.email)))?;

    Ok(())
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn create(&self, user: User) -> Result<(), RepositoryError> {
        insert_user(&self.pool, &user).await
    }

    async fn update(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE app_user
             SET name = ?, role = ?, manager_id = ?, is_active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(user.manager_id.as_ref().map(|id| id.0.as_str()))
        .bind(user.is_active)
        .bind(encode_timestamp(&user.updated_at))
        .bind(&user.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_company(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE company_id = ? ORDER BY created_at, id"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    async fn list_reviewers(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user
             WHERE company_id = ? AND role IN ('manager', 'admin') AND is_active = 1
             ORDER BY name, id"
        ))
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    async fn find_company_admin(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user
             WHERE company_id = ? AND role = 'admin' AND is_active = 1
             ORDER BY created_at, id
             LIMIT 1"
        ))
        .bind(&company_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn summaries(
        &self,
        ids: &[UserId],
    ) -> Result<HashMap<UserId, UserSummary>, RepositoryError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut query = QueryBuilder::<sqlx::Sqlite>::new(format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE id IN ("
        ));
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(&id.0);
        }
        separated.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row_to_user(row).map(|user| (user.id.clone(), user.summary())))
            .collect()
    }
}
