use std::time::Duration;

use expensa_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_from_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// SQLite pool with foreign keys enforced on every connection. File-backed
/// databases are created on first use.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let database_url = with_create_mode(database_url);
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&database_url)
        .await
}

fn with_create_mode(database_url: &str) -> String {
    let file_backed = database_url.starts_with("sqlite://") && !database_url.contains(":memory:");
    if file_backed && !database_url.contains("mode=") {
        let separator = if database_url.contains('?') { '&' } else { '?' };
        format!("{database_url}{separator}mode=rwc")
    } else {
        database_url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::with_create_mode;

    #[test]
    fn file_urls_gain_create_mode() {
        assert_eq!(with_create_mode("sqlite://expensa.db"), "sqlite://expensa.db?mode=rwc");
        assert_eq!(
            with_create_mode("sqlite://expensa.db?cache=shared"),
            "sqlite://expensa.db?cache=shared&mode=rwc"
        );
    }

    #[test]
    fn memory_and_explicit_mode_urls_are_untouched() {
        assert_eq!(with_create_mode("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(with_create_mode("sqlite://data.db?mode=ro"), "sqlite://data.db?mode=ro");
    }
}
