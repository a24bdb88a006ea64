use crate::commands::{prepare, CommandFailure, CommandResult, ExitClass};
use signoff_db::{connect_with_config, migrations, DemoDirectory};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| CommandFailure::new(ExitClass::DbConnectivity, error))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandFailure::new(ExitClass::Migration, error))?;

        let seeded = DemoDirectory::load(&pool)
            .await
            .map_err(|error| CommandFailure::new(ExitClass::SeedExecution, error))?;
        let verification = DemoDirectory::verify(&pool)
            .await
            .map_err(|error| CommandFailure::new(ExitClass::SeedVerification, error))?;

        let run_result = if verification.all_present {
            Ok(seeded.employees_seeded)
        } else {
            Err(CommandFailure::new(
                ExitClass::SeedVerification,
                verification_failure_message(&verification.checks),
            ))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(employees) => {
            let lines: Vec<String> =
                employees.iter().map(|(id, name)| format!("  - {id}: {name}")).collect();
            let message = format!("demo directory loaded:\n{}", lines.join("\n"));
            CommandResult::success("seed", message)
        }
        Err(failure) => CommandResult::failure("seed", failure),
    }
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks = checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "some demo employees failed to load".to_string()
    } else {
        format!("seed verification failed for: {}", failed_checks.join(", "))
    }
}
