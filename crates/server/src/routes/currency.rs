use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::debug;

use expensa_core::currency::{Country, CurrencyCode, ExchangeRates};

use crate::auth::CurrentUser;
use crate::dto::{present, ConversionView, ConvertRequest};
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rates/{base}", get(rates))
        .route("/countries", get(countries))
        .route("/convert", post(convert))
}

#[derive(Debug, Serialize)]
struct CountryList {
    countries: Vec<Country>,
}

async fn rates(
    State(state): State<AppState>,
    _current: CurrentUser,
    Path(base): Path<String>,
) -> Result<Json<ExchangeRates>, ApiError> {
    let base = CurrencyCode::parse(&base)?;
    let rates = state.converter.provider().latest(&base).await?;
    debug!(event_name = "currency.rates.fetched", base = %rates.base, count = rates.rates.len(), "exchange rates fetched");
    Ok(Json(rates))
}

async fn countries(
    State(state): State<AppState>,
    _current: CurrentUser,
) -> Result<Json<CountryList>, ApiError> {
    let countries = state.countries.countries().await?;
    Ok(Json(CountryList { countries }))
}

async fn convert(
    State(state): State<AppState>,
    _current: CurrentUser,
    body: Option<Json<ConvertRequest>>,
) -> Result<Json<ConversionView>, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let (Some(amount), Some(from), Some(to)) = (
        body.amount,
        present(body.from_currency.as_deref()),
        present(body.to_currency.as_deref()),
    ) else {
        return Err(ApiError::validation("Please provide amount, fromCurrency, and toCurrency"));
    };

    let from = CurrencyCode::parse(from)?;
    let to = CurrencyCode::parse(to)?;
    let conversion = state.converter.convert(amount, &from, &to).await?;
    Ok(Json(conversion.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::routes::test_support::TestApp;

    #[tokio::test]
    async fn convert_uses_provider_rate() {
        let app = TestApp::new().await;
        let (status, body) = app
            .post(
                "/api/currency/convert",
                Some("emp"),
                json!({"amount": "10", "fromCurrency": "gbp", "toCurrency": "EUR"}),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["convertedAmount"], "12.0");
        assert_eq!(body["exchangeRate"], "1.2");
        assert_eq!(body["fromCurrency"], "GBP");
    }

    #[tokio::test]
    async fn convert_same_currency_is_identity() {
        let app = TestApp::new().await;
        let (status, body) = app
            .post(
                "/api/currency/convert",
                Some("emp"),
                json!({"amount": "7.5", "fromCurrency": "JPY", "toCurrency": "JPY"}),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["convertedAmount"], "7.5");
        assert_eq!(body["exchangeRate"], "1");
    }

    #[tokio::test]
    async fn convert_rejects_amounts_that_overflow() {
        let app = TestApp::new().await;
        let (status, body) = app
            .post(
                "/api/currency/convert",
                Some("emp"),
                json!({
                    "amount": rust_decimal::Decimal::MAX.to_string(),
                    "fromCurrency": "GBP",
                    "toCurrency": "EUR"
                }),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Amount is too large to convert");
    }

    #[tokio::test]
    async fn convert_rejects_missing_fields_and_unknown_rates() {
        let app = TestApp::new().await;
        let (status, body) =
            app.post("/api/currency/convert", Some("emp"), json!({"amount": "1", "fromCurrency": "USD"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please provide amount, fromCurrency, and toCurrency");

        let (status, body) = app
            .post(
                "/api/currency/convert",
                Some("emp"),
                json!({"amount": "1", "fromCurrency": "USD", "toCurrency": "CHF"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Currency conversion rate not found");

        let (status, _) = app
            .post(
                "/api/currency/convert",
                Some("emp"),
                json!({"amount": "1", "fromCurrency": "DOLLARS", "toCurrency": "EUR"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rates_and_countries_require_authentication() {
        let app = TestApp::new().await;
        assert_eq!(app.get("/api/currency/rates/USD", None).await.0, StatusCode::UNAUTHORIZED);

        let (status, body) = app.get("/api/currency/rates/usd", Some("emp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["base"], "USD");
        assert_eq!(body["rates"]["EUR"], "0.5");

        let (status, body) = app.get("/api/currency/countries", Some("emp")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["countries"][0]["name"], "Germany");
        assert_eq!(body["countries"][0]["currencies"]["EUR"]["symbol"], "€");
    }
}
