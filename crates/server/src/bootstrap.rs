use std::sync::Arc;

use axum::Router;
use expensa_core::auth::TokenService;
use expensa_core::config::{AppConfig, ConfigError, LoadOptions};
use expensa_core::currency::CurrencyConverter;
use expensa_db::repositories::{SqlCompanyRepository, SqlExpenseRepository, SqlUserRepository};
use expensa_db::{connect_from_config, migrations, DbPool};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::info;

use crate::currency_client::{http_client, HttpCountryDirectory, HttpRateProvider};
use crate::receipts::ReceiptStore;
use crate::state::AppState;
use crate::{health, routes};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("could not prepare receipt directory `{path}`: {source}")]
    Uploads { path: String, source: std::io::Error },
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let uploads_dir = config.storage.uploads_dir.clone();
    tokio::fs::create_dir_all(&uploads_dir).await.map_err(|source| BootstrapError::Uploads {
        path: uploads_dir.display().to_string(),
        source,
    })?;

    let client = http_client(config.currency.timeout_secs).map_err(BootstrapError::HttpClient)?;
    let rates = HttpRateProvider::from_config(client.clone(), &config.currency);
    let countries = HttpCountryDirectory::from_config(client, &config.currency);

    let users = Arc::new(SqlUserRepository::new(db_pool.clone()));
    let state = AppState {
        companies: Arc::new(SqlCompanyRepository::new(db_pool.clone())),
        users,
        expenses: Arc::new(SqlExpenseRepository::new(db_pool.clone())),
        tokens: TokenService::new(
            SecretString::from(config.auth.jwt_secret.expose_secret().to_string()),
            config.auth.token_ttl_hours,
        ),
        converter: CurrencyConverter::new(Arc::new(rates)),
        countries: Arc::new(countries),
        receipts: ReceiptStore::new(uploads_dir, config.storage.max_receipt_bytes),
        default_currency: config.currency.default_code()?,
    };
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        rates_base_url = %config.currency.rates_base_url,
        uploads_dir = %config.storage.uploads_dir.display(),
        "application state assembled"
    );

    Ok(Application { config, db_pool, state })
}

/// Full HTTP surface: `/api/*`, receipt files, and the health probe.
pub fn app_router(app: &Application) -> Router {
    routes::router(app.state.clone()).merge(health::router(app.db_pool.clone()))
}
