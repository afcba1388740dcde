use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use expensa_core::auth::AuthError;
use expensa_core::currency::CurrencyError;
use expensa_core::errors::{ApplicationError, DomainError, InterfaceError};
use expensa_core::workflow::WorkflowError;
use expensa_db::repositories::RepositoryError;

/// Handler error. Rendered as `{"message", "correlationId"}` with the status
/// of the matching [`InterfaceError`].
#[derive(Debug)]
pub struct ApiError(ApplicationError);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub correlation_id: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(ApplicationError::Validation(message.into()))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(ApplicationError::Unauthorized(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self(ApplicationError::Forbidden(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self(ApplicationError::NotFound(message.into()))
    }

    pub fn integration(message: impl Into<String>) -> Self {
        Self(ApplicationError::Integration(message.into()))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self(ApplicationError::Configuration(message.into()))
    }

    pub fn inner(&self) -> &ApplicationError {
        &self.0
    }
}

impl From<ApplicationError> for ApiError {
    fn from(value: ApplicationError) -> Self {
        Self(value)
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        Self(ApplicationError::Domain(value))
    }
}

impl From<WorkflowError> for ApiError {
    fn from(value: WorkflowError) -> Self {
        Self(ApplicationError::Domain(DomainError::Workflow(value)))
    }
}

impl From<RepositoryError> for ApiError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => Self(ApplicationError::Conflict(message)),
            other => Self(ApplicationError::Persistence(other.to_string())),
        }
    }
}

impl From<CurrencyError> for ApiError {
    fn from(value: CurrencyError) -> Self {
        match value {
            CurrencyError::InvalidCode(_) => Self::validation(value.to_string()),
            CurrencyError::RateNotFound { .. } => {
                Self::validation("Currency conversion rate not found")
            }
            CurrencyError::AmountOutOfRange { .. } => {
                Self::validation("Amount is too large to convert")
            }
            CurrencyError::Provider(message) => Self::integration(message),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidToken(_) => Self::unauthorized("Token is not valid"),
            other => Self::internal(other.to_string()),
        }
    }
}

pub fn new_correlation_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("req-{}", &id[..12])
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = self.0.to_string();
        let interface: InterfaceError = self.0.into_interface(new_correlation_id());
        let status = StatusCode::from_u16(interface.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(
                event_name = "http.request.failed",
                correlation_id = %interface.correlation_id(),
                status = status.as_u16(),
                error = %detail,
                "request failed"
            );
        } else {
            warn!(
                event_name = "http.request.rejected",
                correlation_id = %interface.correlation_id(),
                status = status.as_u16(),
                error = %detail,
                "request rejected"
            );
        }

        let body = ErrorBody {
            message: interface.user_message().to_string(),
            correlation_id: interface.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use expensa_core::currency::{CurrencyCode, CurrencyError};
    use expensa_db::repositories::RepositoryError;

    use super::{new_correlation_id, ApiError};

    async fn body_json(error: ApiError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let (status, body) = body_json(ApiError::not_found("Expense not found")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Expense not found");
        assert!(body["correlationId"].as_str().is_some_and(|id| id.starts_with("req-")));
    }

    #[tokio::test]
    async fn persistence_failures_are_generic_503s() {
        let error = ApiError::from(RepositoryError::Decode("column `secret_stuff` broke".into()));
        let (status, body) = body_json(error).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body["message"].as_str().unwrap_or_default().contains("secret_stuff"));
    }

    #[tokio::test]
    async fn stale_versions_become_conflicts() {
        let error = ApiError::from(RepositoryError::Conflict("expense changed".into()));
        let (status, _) = body_json(error).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_rates_are_bad_requests() {
        let error = ApiError::from(CurrencyError::RateNotFound {
            from: CurrencyCode::parse("USD").expect("usd"),
            to: CurrencyCode::parse("XYZ").expect("xyz"),
        });
        let (status, body) = body_json(error).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Currency conversion rate not found");
    }

    #[tokio::test]
    async fn unconvertible_amounts_are_bad_requests() {
        let error = ApiError::from(CurrencyError::AmountOutOfRange {
            amount: rust_decimal::Decimal::MAX,
            from: CurrencyCode::parse("GBP").expect("gbp"),
            to: CurrencyCode::parse("EUR").expect("eur"),
        });
        let (status, body) = body_json(error).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Amount is too large to convert");
    }

    #[test]
    fn correlation_ids_are_short_and_unique() {
        let first = new_correlation_id();
        assert_eq!(first.len(), 16);
        assert_ne!(first, new_correlation_id());
    }
}
