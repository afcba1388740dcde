use std::str::FromStr;

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, warn};

use expensa_core::currency::CurrencyCode;
use expensa_core::domain::expense::{parse_expense_date, Expense, ExpenseId, NewExpense};
use expensa_core::domain::user::{Role, User};
use expensa_core::workflow;
use expensa_db::repositories::{ExpenseOrder, ExpenseScope};

use crate::auth::CurrentUser;
use crate::dto::{present, ExpenseList, MessageWithExpense, SubmitExpenseRequest};
use crate::error::ApiError;
use crate::receipts::RECEIPT_ROUTE_PREFIX;
use crate::routes::{expense_view, expense_views};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_expense).get(list_expenses))
        .route("/receipts", post(upload_receipt))
        .route("/pending/count", get(pending_count))
        .route("/{id}", get(get_expense))
}

/// A submission decoded from either JSON or multipart, receipt not yet
/// stored.
struct Submission {
    fields: SubmitExpenseRequest,
    receipt: Option<UploadedFile>,
}

struct UploadedFile {
    file_name: Option<String>,
    bytes: Vec<u8>,
}

async fn submit_expense(
    State(state): State<AppState>,
    current: CurrentUser,
    request: Request,
) -> Result<(StatusCode, Json<MessageWithExpense>), ApiError> {
    let Submission { fields, receipt } = decode_submission(&state, request).await?;
    let employee = &current.0;

    let (Some(amount), Some(category), Some(description), Some(raw_date)) = (
        fields.amount,
        present(fields.category.as_deref()),
        present(fields.description.as_deref()),
        present(fields.date.as_deref()),
    ) else {
        return Err(ApiError::validation("Please provide all required fields"));
    };
    let expense_date = parse_expense_date(raw_date)
        .ok_or_else(|| ApiError::validation("Expense date must be YYYY-MM-DD"))?;

    let company = state
        .companies
        .find_by_id(&employee.company_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Company not found"))?;
    let currency = match present(fields.currency.as_deref()) {
        Some(raw) => CurrencyCode::parse(raw)?,
        None => company.default_currency.clone(),
    };

    let receipt_reference = match (&receipt, present(fields.receipt_url.as_deref())) {
        (None, Some(url)) => {
            // Only references produced by the receipt upload endpoint.
            if !url.starts_with(RECEIPT_ROUTE_PREFIX) || url.contains("..") {
                return Err(ApiError::validation("Invalid receipt reference"));
            }
            Some(url.to_string())
        }
        _ => None,
    };

    let mut input = NewExpense {
        employee_id: employee.id.clone(),
        company_id: company.id.clone(),
        amount,
        currency,
        category: category.to_string(),
        description: description.to_string(),
        expense_date,
        receipt_url: receipt_reference,
    };
    input.validate()?;

    let conversion = state
        .converter
        .convert_or_identity(amount, &input.currency, &company.default_currency)
        .await?;
    if let Some(reason) = &conversion.fallback_reason {
        warn!(
            event_name = "expense.conversion.fallback",
            employee_id = %employee.id,
            from = %input.currency,
            to = %company.default_currency,
            reason = %reason,
            "exchange rate unavailable, converting 1:1"
        );
    }

    let admin = state.users.find_company_admin(&company.id).await?;
    let chain = workflow::plan_chain(employee.manager_id.as_ref(), admin.as_ref().map(|a| &a.id));

    let stored_receipt = match receipt {
        Some(receipt) => Some(state.receipts.save(receipt.file_name.as_deref(), &receipt.bytes).await?),
        None => None,
    };
    if let Some(url) = &stored_receipt {
        input.receipt_url = Some(url.clone());
    }

    let persisted = match Expense::submit(input, &conversion, chain, Utc::now()) {
        Ok(expense) => state.expenses.create(&expense).await.map(|()| expense).map_err(ApiError::from),
        Err(error) => Err(ApiError::from(error)),
    };
    let expense = match persisted {
        Ok(expense) => expense,
        Err(error) => {
            if let Some(url) = &stored_receipt {
                state.receipts.remove(url).await;
            }
            return Err(error);
        }
    };

    info!(
        event_name = "expense.submitted",
        expense_id = %expense.id,
        employee_id = %expense.employee_id,
        company_id = %expense.company_id,
        steps = expense.steps.len(),
        status = expense.status.as_str(),
        "expense submitted"
    );

    Ok((
        StatusCode::CREATED,
        Json(MessageWithExpense {
            message: "Expense submitted successfully".to_string(),
            expense: expense_view(&state, &expense).await?,
        }),
    ))
}

async fn upload_receipt(
    State(state): State<AppState>,
    _current: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("receipt") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        let receipt_url = state.receipts.save(file_name.as_deref(), &bytes).await?;
        return Ok(Json(json!({
            "message": "Receipt uploaded successfully",
            "receiptUrl": receipt_url,
        })));
    }
    Err(ApiError::validation("Please upload a receipt"))
}

async fn list_expenses(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<ExpenseList>, ApiError> {
    let user = &current.0;
    let scope = match user.role {
        Role::Employee => ExpenseScope::SubmittedBy(user.id.clone()),
        Role::Manager => ExpenseScope::AssignedTo(user.id.clone()),
        Role::Admin => ExpenseScope::Company(user.company_id.clone()),
    };
    let expenses = state.expenses.list(&scope, ExpenseOrder::NewestSubmitted).await?;
    Ok(Json(ExpenseList { expenses: expense_views(&state, &expenses).await? }))
}

async fn get_expense(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(expense_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let expense = state
        .expenses
        .find_by_id(&ExpenseId(expense_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Expense not found"))?;

    if !can_view(&current.0, &expense) {
        return Err(ApiError::forbidden("Not authorized to view this expense"));
    }
    Ok(Json(json!({ "expense": expense_view(&state, &expense).await? })))
}

async fn pending_count(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let user = &current.0;
    let count = if user.role.can_review() {
        state.expenses.count_pending_for(&user.id).await?
    } else {
        0
    };
    Ok(Json(json!({ "count": count })))
}

/// Owner, any assigned approver, or an admin of the same company.
fn can_view(user: &User, expense: &Expense) -> bool {
    expense.employee_id == user.id
        || expense.has_approver(&user.id)
        || (user.role == Role::Admin && user.company_id == expense.company_id)
}

async fn decode_submission(state: &AppState, request: Request) -> Result<Submission, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if !is_multipart {
        let Json(fields) = Json::<SubmitExpenseRequest>::from_request(request, state)
            .await
            .map_err(|rejection| ApiError::validation(rejection.body_text()))?;
        return Ok(Submission { fields, receipt: None });
    }

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let mut fields = SubmitExpenseRequest::default();
    let mut receipt = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "receipt" {
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;
            if !bytes.is_empty() {
                receipt = Some(UploadedFile { file_name, bytes: bytes.to_vec() });
            }
            continue;
        }

        let text = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "amount" => {
                fields.amount = match present(Some(&text)) {
                    Some(raw) => Some(
                        Decimal::from_str(raw)
                            .map_err(|_| ApiError::validation("Amount must be a number"))?,
                    ),
                    None => None,
                }
            }
            "currency" => fields.currency = Some(text),
            "category" => fields.category = Some(text),
            "description" => fields.description = Some(text),
            "date" => fields.date = Some(text),
            _ => {}
        }
    }

    Ok(Submission { fields, receipt })
}

fn multipart_error(error: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::validation(error.body_text())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;

    use crate::routes::test_support::TestApp;

    fn submission() -> serde_json::Value {
        json!({
            "amount": "40.00",
            "currency": "USD",
            "category": "travel",
            "description": "Airport taxi",
            "date": "2026-09-14"
        })
    }

    #[tokio::test]
    async fn employee_submission_converts_and_plans_manager_then_admin() {
        let app = TestApp::new().await;

        let (status, body) = app.post("/api/expenses", Some("emp"), submission()).await;

        assert_eq!(status, StatusCode::CREATED);
        let expense = &body["expense"];
        assert_eq!(expense["status"], "PENDING");
        assert_eq!(expense["companyCurrency"], "EUR");
        assert_eq!(expense["convertedAmount"], "20.000");
        assert_eq!(expense["category"], "TRAVEL");
        assert_eq!(expense["approvalSteps"][0]["approverId"], "mgr");
        assert_eq!(expense["approvalSteps"][1]["approverId"], "adm");
        assert_eq!(expense["employee"]["name"], "User emp");
    }

    #[tokio::test]
    async fn unknown_rate_falls_back_to_one_to_one() {
        let app = TestApp::new().await;
        let mut body = submission();
        body["currency"] = json!("JPY");

        let (status, body) = app.post("/api/expenses", Some("emp"), body).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["expense"]["exchangeRate"], "1");
        assert_eq!(body["expense"]["convertedAmount"], "40.00");
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let app = TestApp::new().await;

        let (status, body) =
            app.post("/api/expenses", Some("emp"), json!({"amount": 12, "category": "meals"})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please provide all required fields");
    }

    fn multipart_submission(app: &TestApp, amount: &str) -> Request<Body> {
        let boundary = "expensa-boundary";
        let mut payload = String::new();
        for (name, value) in [
            ("amount", amount),
            ("currency", "EUR"),
            ("category", "meals"),
            ("description", "Sandwich"),
            ("date", "2026-09-15"),
        ] {
            payload.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        payload.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"receipt\"; filename=\"lunch.png\"\r\nContent-Type: image/png\r\n\r\nfake-png\r\n--{boundary}--\r\n"
        ));

        Request::builder()
            .method("POST")
            .uri("/api/expenses")
            .header("authorization", format!("Bearer {}", app.token("emp")))
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(payload))
            .expect("request")
    }

    fn stored_receipts(app: &TestApp) -> usize {
        std::fs::read_dir(app.uploads.path().join("receipts")).map(Iterator::count).unwrap_or(0)
    }

    #[tokio::test]
    async fn multipart_submission_stores_receipt() {
        let app = TestApp::new().await;
        let (status, body) = app.call(multipart_submission(&app, "12.50")).await;

        assert_eq!(status, StatusCode::CREATED);
        let receipt_url = body["expense"]["receiptUrl"].as_str().expect("receipt url");
        assert!(receipt_url.starts_with("/uploads/receipts/") && receipt_url.ends_with(".png"));
        assert_eq!(body["expense"]["exchangeRate"], "1");

        let (status, _) = app.call(
            Request::builder().uri(receipt_url).body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_multipart_submission_leaves_no_receipt_behind() {
        let app = TestApp::new().await;

        let (status, _) = app.call(multipart_submission(&app, "0")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(stored_receipts(&app), 0);
    }

    #[tokio::test]
    async fn amount_too_large_to_convert_is_rejected() {
        let app = TestApp::new().await;
        let mut body = submission();
        body["amount"] = json!(rust_decimal::Decimal::MAX.to_string());
        body["currency"] = json!("GBP");

        let (status, body) = app.post("/api/expenses", Some("emp"), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Amount is too large to convert");
        assert_eq!(app.get("/api/expenses", Some("emp")).await.1["expenses"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn listing_is_scoped_by_role() {
        let app = TestApp::new().await;
        app.post("/api/expenses", Some("emp"), submission()).await;
        app.post("/api/expenses", Some("mgr"), submission()).await;

        let (_, employee) = app.get("/api/expenses", Some("emp")).await;
        let (_, manager) = app.get("/api/expenses", Some("mgr")).await;
        let (_, admin) = app.get("/api/expenses", Some("adm")).await;
        let (_, outsider) = app.get("/api/expenses", Some("other-adm")).await;

        assert_eq!(employee["expenses"].as_array().map(Vec::len), Some(1));
        assert_eq!(manager["expenses"].as_array().map(Vec::len), Some(1));
        assert_eq!(admin["expenses"].as_array().map(Vec::len), Some(2));
        assert_eq!(outsider["expenses"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn single_expense_visibility_and_pending_count() {
        let app = TestApp::new().await;
        let (_, created) = app.post("/api/expenses", Some("emp"), submission()).await;
        let id = created["expense"]["id"].as_str().expect("id").to_string();

        assert_eq!(app.get(&format!("/api/expenses/{id}"), Some("emp")).await.0, StatusCode::OK);
        assert_eq!(app.get(&format!("/api/expenses/{id}"), Some("adm")).await.0, StatusCode::OK);
        let (status, body) = app.get(&format!("/api/expenses/{id}"), Some("other-adm")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Not authorized to view this expense");
        assert_eq!(app.get("/api/expenses/EXP-missing", Some("emp")).await.0, StatusCode::NOT_FOUND);

        assert_eq!(app.get("/api/expenses/pending/count", Some("mgr")).await.1["count"], 1);
        assert_eq!(app.get("/api/expenses/pending/count", Some("emp")).await.1["count"], 0);
    }

    #[tokio::test]
    async fn receipt_upload_returns_public_url() {
        let app = TestApp::new().await;
        let boundary = "b0undary";
        let payload = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"receipt\"; filename=\"bill.pdf\"\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.4\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/expenses/receipts")
            .header("authorization", format!("Bearer {}", app.token("emp")))
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(payload))
            .expect("request");

        let (status, body) = app.call(request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["receiptUrl"].as_str().is_some_and(|url| url.ends_with(".pdf")));
    }
}
