use std::path::Path;

use expensa_core::config::{AppConfig, LoadOptions};
use expensa_db::{connect_from_config, migrations};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

/// Zero when every check passed.
pub fn exit_code(output: &str) -> u8 {
    if output.contains("doctor: all readiness checks passed") {
        0
    } else {
        1
    }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_receipt_storage(&config.storage.uploads_dir));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            let reason = "configuration did not load";
            checks.push(DoctorCheck::skipped("receipt_storage", reason));
            checks.push(DoctorCheck::skipped("database_connectivity", reason));
            checks.push(DoctorCheck::skipped("schema_migrations", reason));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_receipt_storage(dir: &Path) -> DoctorCheck {
    let (status, details) = if dir.is_dir() {
        (CheckStatus::Pass, format!("`{}` exists", dir.display()))
    } else if dir.exists() {
        (CheckStatus::Fail, format!("`{}` exists but is not a directory", dir.display()))
    } else {
        (CheckStatus::Pass, format!("`{}` will be created on server start", dir.display()))
    };
    DoctorCheck { name: "receipt_storage", status, details }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                DoctorCheck::skipped("schema_migrations", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };
        let schema = match migrations::applied_versions(&pool).await {
            Ok(versions) if versions.is_empty() => DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Fail,
                details: "no migrations applied; run `expensa migrate`".to_string(),
            },
            Ok(versions) => DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Pass,
                details: format!("{} migration(s) applied", versions.len()),
            },
            Err(error) => DoctorCheck {
                name: "schema_migrations",
                status: CheckStatus::Fail,
                details: format!("could not read migration history: {error}"),
            },
        };

        pool.close().await;
        vec![connectivity, schema]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{check_receipt_storage, CheckStatus};

    #[test]
    fn receipt_storage_accepts_existing_or_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(check_receipt_storage(dir.path()).status, CheckStatus::Pass);
        assert_eq!(check_receipt_storage(&dir.path().join("later")).status, CheckStatus::Pass);

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").expect("write");
        assert_eq!(check_receipt_storage(&file).status, CheckStatus::Fail);
    }
}
