use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::company::CompanyId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn generate() -> Self {
        Self(format!("USR-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Employee,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    /// Managers and admins hold approval steps; employees only submit.
    pub fn can_review(&self) -> bool {
        matches!(self, Self::Manager | Self::Admin)
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "employee" => Ok(Self::Employee),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            other => Err(DomainError::InvariantViolation(format!("unknown role `{other}`"))),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub company_id: CompanyId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub manager_id: Option<UserId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }
}

// Hand-written so password hashes never reach log output.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("company_id", &self.company_id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("manager_id", &self.manager_id)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// Public projection of a user embedded in expense and approval payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{normalize_email, Role, User, UserId};
    use crate::domain::company::CompanyId;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("MANAGER".parse::<Role>().expect("manager"), Role::Manager);
        assert_eq!(" admin ".parse::<Role>().expect("admin"), Role::Admin);
        assert!("auditor".parse::<Role>().is_err());
    }

    #[test]
    fn only_managers_and_admins_review() {
        assert!(!Role::Employee.can_review());
        assert!(Role::Manager.can_review());
        assert!(Role::Admin.can_review());
    }

    #[test]
    fn debug_output_omits_password_hash() {
        let now = Utc::now();
        let user = User {
            id: UserId("USR-1".to_string()),
            company_id: CompanyId("CMP-1".to_string()),
            name: "Dana".to_string(),
            email: "dana@acme.test".to_string(),
            password_hash: "$argon2id$secret-material".to_string(),
            role: Role::Employee,
            manager_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let debug = format!("{user:?}");
        assert!(!debug.contains("secret-material"));
        assert!(debug.contains("dana@acme.test"));
    }

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Dana@Acme.TEST "), "dana@acme.test");
    }
}
