use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::currency::CurrencyCode;

const MIN_JWT_SECRET_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub currency: CurrencyConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub token_ttl_hours: u64,
}

#[derive(Clone, Debug)]
pub struct CurrencyConfig {
    pub default_currency: String,
    pub rates_base_url: String,
    pub countries_base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub uploads_dir: PathBuf,
    pub max_receipt_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub jwt_secret: Option<String>,
    pub uploads_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://expensa.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 5000,
                graceful_shutdown_secs: 15,
            },
            auth: AuthConfig { jwt_secret: String::new().into(), token_ttl_hours: 24 },
            currency: CurrencyConfig {
                default_currency: "USD".to_string(),
                rates_base_url: "https://api.exchangerate-api.com/v4/latest".to_string(),
                countries_base_url: "https://restcountries.com/v3.1".to_string(),
                timeout_secs: 10,
            },
            storage: StorageConfig {
                uploads_dir: PathBuf::from("uploads/receipts"),
                max_receipt_bytes: 5 * 1024 * 1024,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl CurrencyConfig {
    /// Parsed form of `default_currency`; only valid after [`AppConfig::validate`].
    pub fn default_code(&self) -> Result<CurrencyCode, ConfigError> {
        CurrencyCode::parse(&self.default_currency).map_err(|_| {
            ConfigError::Validation(format!(
                "currency.default_currency `{}` is not a three-letter code",
                self.default_currency
            ))
        })
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("expensa.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(jwt_secret) = auth.jwt_secret {
                self.auth.jwt_secret = jwt_secret.into();
            }
            if let Some(token_ttl_hours) = auth.token_ttl_hours {
                self.auth.token_ttl_hours = token_ttl_hours;
            }
        }

        if let Some(currency) = patch.currency {
            if let Some(default_currency) = currency.default_currency {
                self.currency.default_currency = default_currency;
            }
            if let Some(rates_base_url) = currency.rates_base_url {
                self.currency.rates_base_url = rates_base_url;
            }
            if let Some(countries_base_url) = currency.countries_base_url {
                self.currency.countries_base_url = countries_base_url;
            }
            if let Some(timeout_secs) = currency.timeout_secs {
                self.currency.timeout_secs = timeout_secs;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(uploads_dir) = storage.uploads_dir {
                self.storage.uploads_dir = uploads_dir;
            }
            if let Some(max_receipt_bytes) = storage.max_receipt_bytes {
                self.storage.max_receipt_bytes = max_receipt_bytes;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("EXPENSA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("EXPENSA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("EXPENSA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("EXPENSA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("EXPENSA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("EXPENSA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("EXPENSA_SERVER_PORT").or_else(|| read_env("PORT"));
        if let Some(value) = port {
            self.server.port = parse_u16("EXPENSA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("EXPENSA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("EXPENSA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("EXPENSA_AUTH_JWT_SECRET") {
            self.auth.jwt_secret = value.into();
        }
        if let Some(value) = read_env("EXPENSA_AUTH_TOKEN_TTL_HOURS") {
            self.auth.token_ttl_hours = parse_u64("EXPENSA_AUTH_TOKEN_TTL_HOURS", &value)?;
        }

        if let Some(value) = read_env("EXPENSA_CURRENCY_DEFAULT_CURRENCY") {
            self.currency.default_currency = value;
        }
        if let Some(value) = read_env("EXPENSA_CURRENCY_RATES_BASE_URL") {
            self.currency.rates_base_url = value;
        }
        if let Some(value) = read_env("EXPENSA_CURRENCY_COUNTRIES_BASE_URL") {
            self.currency.countries_base_url = value;
        }
        if let Some(value) = read_env("EXPENSA_CURRENCY_TIMEOUT_SECS") {
            self.currency.timeout_secs = parse_u64("EXPENSA_CURRENCY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("EXPENSA_STORAGE_UPLOADS_DIR") {
            self.storage.uploads_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("EXPENSA_STORAGE_MAX_RECEIPT_BYTES") {
            self.storage.max_receipt_bytes = parse_usize("EXPENSA_STORAGE_MAX_RECEIPT_BYTES", &value)?;
        }

        let log_level =
            read_env("EXPENSA_LOGGING_LEVEL").or_else(|| read_env("EXPENSA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("EXPENSA_LOGGING_FORMAT").or_else(|| read_env("EXPENSA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(jwt_secret) = overrides.jwt_secret {
            self.auth.jwt_secret = jwt_secret.into();
        }
        if let Some(uploads_dir) = overrides.uploads_dir {
            self.storage.uploads_dir = uploads_dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_auth(&self.auth)?;
        validate_currency(&self.currency)?;
        validate_storage(&self.storage)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("expensa.toml"), PathBuf::from("config/expensa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let secret = auth.jwt_secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.jwt_secret is required (set EXPENSA_AUTH_JWT_SECRET or [auth].jwt_secret)"
                .to_string(),
        ));
    }
    if secret.len() < MIN_JWT_SECRET_LEN {
        return Err(ConfigError::Validation(format!(
            "auth.jwt_secret must be at least {MIN_JWT_SECRET_LEN} characters"
        )));
    }

    if auth.token_ttl_hours == 0 || auth.token_ttl_hours > 24 * 30 {
        return Err(ConfigError::Validation(
            "auth.token_ttl_hours must be in range 1..=720".to_string(),
        ));
    }

    Ok(())
}

fn validate_currency(currency: &CurrencyConfig) -> Result<(), ConfigError> {
    currency.default_code()?;

    for (key, url) in [
        ("currency.rates_base_url", &currency.rates_base_url),
        ("currency.countries_base_url", &currency.countries_base_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }

    if currency.timeout_secs == 0 || currency.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "currency.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.uploads_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.uploads_dir must not be empty".to_string()));
    }

    if storage.max_receipt_bytes == 0 {
        return Err(ConfigError::Validation(
            "storage.max_receipt_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    auth: Option<AuthPatch>,
    currency: Option<CurrencyPatch>,
    storage: Option<StoragePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    jwt_secret: Option<String>,
    token_ttl_hours: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CurrencyPatch {
    default_currency: Option<String>,
    rates_base_url: Option<String>,
    countries_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    uploads_dir: Option<PathBuf>,
    max_receipt_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
