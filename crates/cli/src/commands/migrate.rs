use majordome_core::config::{AppConfig, LoadOptions};
use majordome_db::{connect_with_settings, migrations};

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("migrate", "config", error.to_string(), 1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure("migrate", "runtime", error.to_string(), 1);
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure("migrate", "database", error.to_string(), 2);
            }
        };

        let result = match migrations::run_pending(&pool).await {
            Ok(()) => CommandResult::success("migrate", "pending migrations applied"),
            Err(error) => CommandResult::failure("migrate", "migration", error.to_string(), 2),
        };
        pool.close().await;
        result
    })
}
