use expensa_db::migrations;

use crate::commands::{with_database, CommandResult, Failure};

pub fn run() -> CommandResult {
    with_database("migrate", |_config, pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), 5))?;
        let versions = migrations::applied_versions(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), 5))?;

        Ok(match versions.last() {
            Some(latest) => format!("applied pending migrations; schema at version {latest}"),
            None => "no migrations to apply".to_string(),
        })
    })
}
