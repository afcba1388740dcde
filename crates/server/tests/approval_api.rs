use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use expensa_core::auth::TokenService;
use expensa_core::currency::{CurrencyCode, CurrencyConverter, StaticCountryDirectory, StaticRateProvider};
use expensa_db::fixtures::DEMO_ACCOUNTS;
use expensa_db::repositories::{SqlCompanyRepository, SqlExpenseRepository, SqlUserRepository};
use expensa_db::{connect_with_settings, migrations, DbPool, DemoSeed};
use expensa_server::receipts::ReceiptStore;
use expensa_server::routes;
use expensa_server::state::AppState;

struct Harness {
    router: Router,
    pool: DbPool,
    _uploads: tempfile::TempDir,
}

impl Harness {
    async fn start() -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoSeed::load(&pool).await.expect("seed");

        let uploads = tempfile::tempdir().expect("tempdir");
        let rates = StaticRateProvider::default().with_rate("EUR", "USD", Decimal::new(11, 1));
        let state = AppState {
            companies: Arc::new(SqlCompanyRepository::new(pool.clone())),
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            expenses: Arc::new(SqlExpenseRepository::new(pool.clone())),
            tokens: TokenService::new(SecretString::from("integration-secret-value".to_string()), 1),
            converter: CurrencyConverter::new(Arc::new(rates)),
            countries: Arc::new(StaticCountryDirectory::default()),
            receipts: ReceiptStore::new(uploads.path().join("receipts"), 4096),
            default_currency: CurrencyCode::parse("USD").expect("usd"),
        };

        Self { router: routes::router(state), pool, _uploads: uploads }
    }

    async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn login(&self, email: &str) -> String {
        let account = DEMO_ACCOUNTS.iter().find(|account| account.email == email).expect("demo account");
        let (status, body) = self
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({"email": account.email, "password": account.password})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["token"].as_str().expect("token").to_string()
    }
}

#[tokio::test]
async fn seeded_company_runs_the_two_step_chain_end_to_end() {
    let app = Harness::start().await;
    let employee = app.login("employee@test.com").await;
    let manager = app.login("manager@test.com").await;
    let admin = app.login("admin@test.com").await;

    let (status, body) = app
        .send(
            "POST",
            "/api/expenses",
            Some(&employee),
            Some(json!({
                "amount": "100",
                "currency": "EUR",
                "category": "Travel",
                "description": "Train to Brussels",
                "date": "2026-09-14"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["expense"]["id"].as_str().expect("id").to_string();
    assert_eq!(body["expense"]["convertedAmount"], "110.0");
    assert_eq!(body["expense"]["companyCurrency"], "USD");
    assert_eq!(body["expense"]["approvalSteps"][0]["approverId"], "USR-demo-manager");
    assert_eq!(body["expense"]["approvalSteps"][1]["approverId"], "USR-demo-admin");

    let (_, count) = app.send("GET", "/api/expenses/pending/count", Some(&manager), None).await;
    assert_eq!(count["count"], 1);

    let (status, body) =
        app.send("POST", &format!("/api/approval/{id}/approve"), Some(&manager), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expense"]["status"], "IN_REVIEW");
    assert_eq!(body["expense"]["version"], 2);

    let (status, _) =
        app.send("POST", &format!("/api/approval/{id}/approve"), Some(&manager), Some(json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send("POST", &format!("/api/approval/{id}/approve"), Some(&admin), Some(json!({"comments": "ok"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expense"]["status"], "APPROVED");
    assert_eq!(body["expense"]["version"], 3);

    let (_, mine) = app.send("GET", "/api/expenses", Some(&employee), None).await;
    assert_eq!(mine["expenses"][0]["status"], "APPROVED");
    assert_eq!(mine["expenses"][0]["approvalSteps"][1]["comments"], "ok");

    app.pool.close().await;
}

#[tokio::test]
async fn admin_override_closes_an_open_expense() {
    let app = Harness::start().await;
    let employee = app.login("employee@test.com").await;
    let admin = app.login("admin@test.com").await;

    let (_, body) = app
        .send(
            "POST",
            "/api/expenses",
            Some(&employee),
            Some(json!({
                "amount": "12.50",
                "category": "meals",
                "description": "Lunch",
                "date": "2026-09-15"
            })),
        )
        .await;
    let id = body["expense"]["id"].as_str().expect("id").to_string();
    assert_eq!(body["expense"]["exchangeRate"], "1");

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/approval/{id}/override"),
            Some(&admin),
            Some(json!({"action": "approve"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Expense approved successfully (Admin Override)");
    assert_eq!(body["expense"]["finalComments"], "Admin Override");
    assert_eq!(body["expense"]["approvalSteps"][0]["status"], "APPROVED");
    assert_eq!(body["expense"]["approvalSteps"][1]["status"], "APPROVED");

    let (_, pending) = app.send("GET", "/api/approval/pending", Some(&admin), None).await;
    assert_eq!(pending["expenses"].as_array().map(Vec::len), Some(0));

    app.pool.close().await;
}

#[tokio::test]
async fn requests_without_a_valid_token_are_rejected() {
    let app = Harness::start().await;

    let (status, body) = app.send("GET", "/api/expenses", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "No token, authorization denied");
    assert!(body["correlationId"].as_str().is_some_and(|id| id.starts_with("req-")));

    let (status, body) = app.send("GET", "/api/expenses", Some("not-a-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token is not valid");

    app.pool.close().await;
}
