use chrono::Utc;
use propbot_core::config::LoadOptions;
use propbot_db::{connect_from_config, migrations, SessionStore, SqlSessionStore};

use crate::commands::{block_on, load_config, CommandResult};

const COMMAND: &str = "sessions prune";

/// Bulk-deletes expired chat sessions. Loads already drop expired rows lazily; this keeps the
/// table from growing with conversations nobody returns to.
pub fn prune(options: LoadOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = block_on(COMMAND, async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let pending = migrations::pending_versions(&pool)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        if !pending.is_empty() {
            pool.close().await;
            return Err((
                "schema_outdated",
                "database schema is behind; run `propbot migrate` first".to_string(),
                5u8,
            ));
        }

        let store = SqlSessionStore::new(pool.clone(), config.session_ttl());
        let pruned = store
            .prune_expired(Utc::now())
            .await
            .map_err(|error| ("persistence", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<u64, (&'static str, String, u8)>(pruned)
    });

    match result {
        Ok(Ok(pruned)) => {
            CommandResult::success(COMMAND, format!("pruned {pruned} expired session(s)"))
        }
        Ok(Err((error_class, message, exit_code))) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
        Err(failure) => failure,
    }
}
