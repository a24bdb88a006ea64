use crate::commands::{prepare, CommandFailure, CommandResult, ExitClass};
use signoff_db::{connect_with_config, migrations};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| CommandFailure::new(ExitClass::DbConnectivity, error))?;
        let migration = |error: String| CommandFailure::new(ExitClass::Migration, error);

        let before = migrations::pending_count(&pool)
            .await
            .map_err(|error| migration(error.to_string()))?;
        migrations::run_pending(&pool).await.map_err(|error| migration(error.to_string()))?;
        let after = migrations::pending_count(&pool)
            .await
            .map_err(|error| migration(error.to_string()))?;
        pool.close().await;
        Ok::<_, CommandFailure>((before.saturating_sub(after), after))
    });

    match result {
        Ok((0, 0)) => CommandResult::success("migrate", "schema already up to date"),
        Ok((applied, pending)) => CommandResult::success(
            "migrate",
            format!("applied {applied} migration(s); {pending} pending"),
        ),
        Err(failure) => CommandResult::failure("migrate", failure),
    }
}
