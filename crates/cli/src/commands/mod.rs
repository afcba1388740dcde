pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;

use std::future::Future;

use expensa_core::config::{AppConfig, LoadOptions};
use expensa_db::{connect_from_config, DbPool};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn from_failure(command: &str, failure: Failure) -> Self {
        Self::failure(command, failure.class, failure.message, failure.exit_code)
    }
}

/// Classified command failure; the class and exit code are stable for scripts.
#[derive(Debug)]
pub(crate) struct Failure {
    class: &'static str,
    message: String,
    exit_code: u8,
}

impl Failure {
    pub(crate) fn new(class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { class, message: message.into(), exit_code }
    }
}

/// Loads configuration, opens the pool, runs `work`, and closes the pool.
/// Exit codes: 2 config, 3 runtime, 4 database connectivity; `work` picks
/// its own from 5 upwards.
pub(crate) fn with_database<T, F, Fut>(command: &str, work: F) -> CommandResult
where
    T: Into<String>,
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;
        let outcome = work(config, pool.clone()).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => CommandResult::success(command, message),
        Err(failure) => CommandResult::from_failure(command, failure),
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
