//! Bearer-token authentication and role gates for handlers.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use expensa_core::domain::user::{Role, User};

use crate::error::ApiError;
use crate::state::AppState;

/// The active user behind the request's bearer token.
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn require_role(&self, allowed: &[Role]) -> Result<&User, ApiError> {
        if allowed.contains(&self.0.role) {
            Ok(&self.0)
        } else {
            Err(ApiError::forbidden(format!(
                "User role {} is not authorized to access this route",
                self.0.role.as_str().to_ascii_uppercase()
            )))
        }
    }

    pub fn require_admin(&self) -> Result<&User, ApiError> {
        self.require_role(&[Role::Admin])
    }

    pub fn require_reviewer(&self) -> Result<&User, ApiError> {
        self.require_role(&[Role::Manager, Role::Admin])
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("No token, authorization denied"))?;
        let claims = state.tokens.verify(token)?;

        let user = state
            .users
            .find_by_id(&claims.user_id())
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| ApiError::unauthorized("User not found or inactive"))?;

        Ok(Self(user))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
