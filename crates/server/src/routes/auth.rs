use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use expensa_core::auth::{hash_password, verify_password};
use expensa_core::currency::CurrencyCode;
use expensa_core::domain::company::{Company, CompanyId};
use expensa_core::domain::user::{normalize_email, Role, User, UserId};
use expensa_db::repositories::RepositoryError;

use crate::auth::CurrentUser;
use crate::dto::{
    present, LoginRequest, RegisterCompanyRequest, RegisterUserRequest, SessionResponse,
    UpdateUserRequest, UserView,
};
use crate::error::ApiError;
use crate::state::AppState;

const MISSING_FIELDS: &str = "Please provide all required fields";
const COMPANY_EXISTS: &str = "Company already exists";
const USER_EXISTS: &str = "User already exists";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register-company", post(register_company))
        .route("/register", post(register_user))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/users", get(list_users))
        .route("/users/{id}", patch(update_user))
        .route("/managers", get(list_managers))
}

async fn register_company(
    State(state): State<AppState>,
    Json(body): Json<RegisterCompanyRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let (Some(company_name), Some(admin_name), Some(admin_email), Some(password)) = (
        present(body.company_name.as_deref()),
        present(body.admin_name.as_deref()),
        present(body.admin_email.as_deref()),
        secret(body.password.as_deref()),
    ) else {
        return Err(ApiError::validation(MISSING_FIELDS));
    };
    let admin_email = normalize_email(admin_email);
    let default_currency = match present(body.default_currency.as_deref()) {
        Some(raw) => CurrencyCode::parse(raw)?,
        None => state.default_currency.clone(),
    };

    if state.companies.find_by_name(company_name).await?.is_some() {
        return Err(ApiError::validation(COMPANY_EXISTS));
    }
    if state.users.find_by_email(&admin_email).await?.is_some() {
        return Err(ApiError::validation(USER_EXISTS));
    }

    let now = Utc::now();
    let company_id = CompanyId::generate();
    let admin = User {
        id: UserId::generate(),
        company_id: company_id.clone(),
        name: admin_name.to_string(),
        email: admin_email,
        password_hash: hash_off_thread(password.to_string()).await?,
        role: Role::Admin,
        manager_id: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let company = Company {
        id: company_id,
        name: company_name.to_string(),
        default_currency,
        admin_id: Some(admin.id.clone()),
        created_at: now,
        updated_at: now,
    };

    if let Err(error) = state.companies.register(company.clone(), admin.clone()).await {
        // Unique indexes still catch registrations that raced past the checks above.
        let name_taken = matches!(error, RepositoryError::Conflict(_))
            && state.companies.find_by_name(&company.name).await?.is_some();
        return Err(if name_taken { ApiError::validation(COMPANY_EXISTS) } else { duplicate_user(error) });
    }
    let token = state.tokens.issue(&admin, now)?;

    info!(
        event_name = "auth.company.registered",
        company_id = %company.id,
        admin_id = %admin.id,
        default_currency = %company.default_currency,
        "company registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            message: "Company and admin user created successfully".to_string(),
            token,
            user: UserView::from(&admin),
        }),
    ))
}

async fn register_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(body): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let admin = current.require_admin()?;

    let (Some(name), Some(email), Some(password), Some(role)) = (
        present(body.name.as_deref()),
        present(body.email.as_deref()),
        secret(body.password.as_deref()),
        present(body.role.as_deref()),
    ) else {
        return Err(ApiError::validation(MISSING_FIELDS));
    };
    let email = normalize_email(email);

    if state.users.find_by_email(&email).await?.is_some() {
        return Err(ApiError::validation(USER_EXISTS));
    }
    let role = assignable_role(role)?;
    let manager_id = present(body.manager_id.as_deref()).map(|id| UserId(id.to_string()));
    if role == Role::Employee && manager_id.is_none() {
        return Err(ApiError::validation("Manager ID is required for Employee role"));
    }
    if let Some(manager_id) = &manager_id {
        ensure_valid_manager(&state, admin, manager_id, None).await?;
    }

    let now = Utc::now();
    let user = User {
        id: UserId::generate(),
        company_id: admin.company_id.clone(),
        name: name.to_string(),
        email,
        password_hash: hash_off_thread(password.to_string()).await?,
        role,
        manager_id,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    state.users.create(user.clone()).await.map_err(duplicate_user)?;

    info!(
        event_name = "auth.user.registered",
        company_id = %user.company_id,
        user_id = %user.id,
        role = user.role.as_str(),
        registered_by = %admin.id,
        "user registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User created successfully", "user": UserView::from(&user) })),
    ))
}

fn duplicate_user(error: RepositoryError) -> ApiError {
    match error {
        RepositoryError::Conflict(_) => ApiError::validation(USER_EXISTS),
        other => other.into(),
    }
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (Some(email), Some(password)) =
        (present(body.email.as_deref()), secret(body.password.as_deref()))
    else {
        return Err(ApiError::validation("Please provide email and password"));
    };

    let user = state
        .users
        .find_by_email(&normalize_email(email))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    if !user.is_active {
        return Err(ApiError::unauthorized("User account is inactive"));
    }
    if !verify_off_thread(password.to_string(), user.password_hash.clone()).await? {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let token = state.tokens.issue(&user, Utc::now())?;
    info!(event_name = "auth.login.succeeded", user_id = %user.id, "user logged in");

    Ok(Json(SessionResponse {
        message: "Login successful".to_string(),
        token,
        user: UserView::from(&user),
    }))
}

async fn me(current: CurrentUser) -> Json<Value> {
    Json(json!({ "user": UserView::from(&current.0) }))
}

async fn list_users(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let admin = current.require_admin()?;
    let users = state.users.list_by_company(&admin.company_id).await?;
    let users: Vec<UserView> = users.iter().map(UserView::from).collect();
    Ok(Json(json!({ "users": users })))
}

async fn list_managers(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let admin = current.require_admin()?;
    let managers = state.users.list_reviewers(&admin.company_id).await?;
    let managers: Vec<UserView> = managers.iter().map(UserView::from).collect();
    Ok(Json(json!({ "managers": managers })))
}

async fn update_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    let admin = current.require_admin()?;
    let mut user = state
        .users
        .find_by_id(&UserId(user_id))
        .await?
        .filter(|user| user.company_id == admin.company_id)
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if let Some(role) = present(body.role.as_deref()) {
        let role = assignable_role(role)?;
        if user.role == Role::Admin && role != Role::Admin {
            return Err(ApiError::validation("Admin roles cannot be reassigned"));
        }
        user.role = role;
    }

    // An empty managerId clears the assignment.
    if let Some(raw) = body.manager_id.as_deref() {
        user.manager_id = match present(Some(raw)) {
            Some(id) => {
                let manager_id = UserId(id.to_string());
                ensure_valid_manager(&state, admin, &manager_id, Some(&user.id)).await?;
                Some(manager_id)
            }
            None => None,
        };
    }

    if let Some(is_active) = body.is_active {
        if !is_active && user.id == admin.id {
            return Err(ApiError::validation("Admins cannot deactivate themselves"));
        }
        user.is_active = is_active;
    }

    if user.role == Role::Employee && user.manager_id.is_none() {
        return Err(ApiError::validation("Manager ID is required for Employee role"));
    }

    user.updated_at = Utc::now();
    state.users.update(&user).await?;

    info!(
        event_name = "auth.user.updated",
        user_id = %user.id,
        role = user.role.as_str(),
        manager_id = user.manager_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
        updated_by = %admin.id,
        "user assignment updated"
    );

    Ok(Json(json!({ "message": "User updated successfully", "user": UserView::from(&user) })))
}

/// Passwords are taken verbatim; only all-blank input counts as missing.
fn secret(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Roles an admin may hand out: employee or manager.
fn assignable_role(raw: &str) -> Result<Role, ApiError> {
    match Role::from_str(raw) {
        Ok(role @ (Role::Employee | Role::Manager)) => Ok(role),
        _ => Err(ApiError::validation("Invalid role")),
    }
}

/// A manager must be an active manager or admin of the admin's company and
/// not the user being assigned.
async fn ensure_valid_manager(
    state: &AppState,
    admin: &User,
    manager_id: &UserId,
    assignee: Option<&UserId>,
) -> Result<(), ApiError> {
    let manager = state.users.find_by_id(manager_id).await?;
    let valid = manager.is_some_and(|manager| {
        manager.company_id == admin.company_id
            && manager.is_active
            && manager.role.can_review()
            && Some(&manager.id) != assignee
    });
    if valid {
        Ok(())
    } else {
        Err(ApiError::validation("Invalid manager ID"))
    }
}

async fn hash_off_thread(password: String) -> Result<String, ApiError> {
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|error| ApiError::internal(format!("hashing task failed: {error}")))?;
    Ok(hashed?)
}

async fn verify_off_thread(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|error| ApiError::internal(format!("verification task failed: {error}")))
}
