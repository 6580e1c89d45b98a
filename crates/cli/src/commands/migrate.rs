use propbot_core::config::LoadOptions;
use propbot_db::{connect_from_config, migrations};

use crate::commands::{block_on, load_config, CommandResult};

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("migrate", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on("migrate", async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let pending = migrations::pending_versions(&pool)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(pending.len())
    });

    match result {
        Ok(Ok(0)) => CommandResult::success("migrate", "schema already up to date"),
        Ok(Ok(applied)) => {
            CommandResult::success("migrate", format!("applied {applied} pending migration(s)"))
        }
        Ok(Err((error_class, message, exit_code))) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
        Err(failure) => failure,
    }
}
