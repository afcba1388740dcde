use expensa_db::fixtures::{DemoAccount, DEMO_COMPANY_NAME};
use expensa_db::{migrations, DemoSeed};

use crate::commands::{with_database, CommandResult, Failure};

/// Loads the demo company and accounts. With `reset`, the demo company and
/// everything under it is removed first.
pub fn run(reset: bool) -> CommandResult {
    with_database("seed", |_config, pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| Failure::new("migration", error.to_string(), 5))?;

        if reset {
            DemoSeed::clean(&pool)
                .await
                .map_err(|error| Failure::new("seed_reset", error.to_string(), 5))?;
        }

        let seeded = DemoSeed::load(&pool)
            .await
            .map_err(|error| Failure::new("seed_execution", error.to_string(), 5))?;

        let verification = DemoSeed::verify(&pool)
            .await
            .map_err(|error| Failure::new("seed_verification", error.to_string(), 6))?;
        if !verification.all_present {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect::<Vec<_>>();
            return Err(Failure::new("seed_verification", verification_message(&failed), 6));
        }

        Ok(summary(seeded.created, &seeded.accounts))
    })
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

fn summary(created: bool, accounts: &[DemoAccount]) -> String {
    let heading = if created {
        format!("demo company `{DEMO_COMPANY_NAME}` loaded with accounts:")
    } else {
        format!("demo company `{DEMO_COMPANY_NAME}` already present; accounts:")
    };
    let lines = accounts
        .iter()
        .map(|account| format!("  - {}: {} / {}", account.role.as_str(), account.email, account.password));
    std::iter::once(heading).chain(lines).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use expensa_db::fixtures::DEMO_ACCOUNTS;

    use super::{summary, verification_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["company", "user:manager@test.com"]),
            "Seed verification failed for checks: company, user:manager@test.com"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }

    #[test]
    fn summary_lists_demo_credentials() {
        let text = summary(true, DEMO_ACCOUNTS);
        assert!(text.starts_with("demo company `Test Company` loaded"));
        assert!(text.contains("  - employee: employee@test.com / employee123"));
        assert!(summary(false, DEMO_ACCOUNTS).contains("already present"));
    }
}
