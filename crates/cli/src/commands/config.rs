use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use expensa_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in effective_values(&config) {
        let source = field_source(key, &env_key(key), config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("auth.jwt_secret", redact_secret(config.auth.jwt_secret.expose_secret())),
        ("auth.token_ttl_hours", config.auth.token_ttl_hours.to_string()),
        ("currency.default_currency", config.currency.default_currency.clone()),
        ("currency.rates_base_url", config.currency.rates_base_url.clone()),
        ("currency.countries_base_url", config.currency.countries_base_url.clone()),
        ("currency.timeout_secs", config.currency.timeout_secs.to_string()),
        ("storage.uploads_dir", config.storage.uploads_dir.display().to_string()),
        ("storage.max_receipt_bytes", config.storage.max_receipt_bytes.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_ascii_lowercase()),
    ]
}

/// `auth.jwt_secret` -> `EXPENSA_AUTH_JWT_SECRET`.
fn env_key(key_path: &str) -> String {
    format!("EXPENSA_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("expensa.toml"), PathBuf::from("config/expensa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        format!("<redacted, {} chars>", secret.chars().count())
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, env_key, redact_secret};

    #[test]
    fn env_keys_follow_section_and_field() {
        assert_eq!(env_key("auth.jwt_secret"), "EXPENSA_AUTH_JWT_SECRET");
        assert_eq!(env_key("storage.max_receipt_bytes"), "EXPENSA_STORAGE_MAX_RECEIPT_BYTES");
    }

    #[test]
    fn secrets_never_render_verbatim() {
        assert_eq!(redact_secret(""), "<empty>");
        assert_eq!(redact_secret("abcdefghijklmnop"), "<redacted, 16 chars>");
    }

    #[test]
    fn nested_keys_are_found_in_file_documents() {
        let doc: toml::Value = "[server]\nport = 8080\n".parse().expect("toml");
        assert!(contains_path(&doc, "server.port"));
        assert!(!contains_path(&doc, "server.bind_address"));
    }
}
