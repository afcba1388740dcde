use sqlx::sqlite::SqliteRow;

use expensa_core::domain::company::{Company, CompanyId};
use expensa_core::domain::user::{User, UserId};

use super::rows::{column, currency, encode_timestamp, timestamp};
use super::user::insert_user;
use super::{conflict_from_unique, CompanyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCompanyRepository {
    pool: DbPool,
}

impl SqlCompanyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_company(row: &SqliteRow) -> Result<Company, RepositoryError> {
    let admin_id: Option<String> = column(row, "admin_id")?;
    Ok(Company {
        id: CompanyId(column(row, "id")?),
        name: column(row, "name")?,
        default_currency: currency(row, "default_currency")?,
        admin_id: admin_id.map(UserId),
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

#[async_trait::async_trait]
impl CompanyRepository for SqlCompanyRepository {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, default_currency, admin_id, created_at, updated_at
             FROM company WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_company).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Company>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, default_currency, admin_id, created_at, updated_at
             FROM company WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_company).transpose()
    }

    async fn register(&self, company: Company, admin: User) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // admin_id is set once the admin row exists.
        sqlx::query(
            "INSERT INTO company (id, name, default_currency, admin_id, created_at, updated_at)
             VALUES (?, ?, ?, NULL, ?, ?)",
        )
        .bind(&company.id.0)
        .bind(&company.name)
        .bind(company.default_currency.as_str())
        .bind(encode_timestamp(&company.created_at))
        .bind(encode_timestamp(&company.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_from_unique(e, format!("company `{}` already exists", company.name)))?;

        insert_user(&mut *tx, &admin).await?;

        sqlx::query("UPDATE company SET admin_id = ? WHERE id = ?")
            .bind(&admin.id.0)
            .bind(&company.id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
