use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use majordome_agent::{HttpLlmClient, InMemorySessionCache, Orchestrator, SessionStore};
use majordome_core::config::{AppConfig, ConfigError, LoadOptions};
use majordome_db::repositories::{SqlConversationRepository, SqlUserIntegrationRepository};
use majordome_db::{connect_with_settings, migrations, DbPool};
use majordome_integrations::http::{shared_client, API_TIMEOUT_SECS};
use majordome_integrations::{default_registry, CredentialStore, TokenRefresher};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
    pub refresher: Arc<TokenRefresher>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let http_client = shared_client(API_TIMEOUT_SECS);
    let registry = Arc::new(default_registry(&http_client));
    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let user_integrations = Arc::new(SqlUserIntegrationRepository::new(db_pool.clone()));
    let credentials = Arc::new(CredentialStore::new(
        user_integrations.clone(),
        registry.clone(),
        config.oauth.clone(),
    ));
    let refresher = Arc::new(TokenRefresher::new(
        user_integrations.clone(),
        credentials.clone(),
        &config.refresher,
    ));
    let sessions =
        SessionStore::new(Arc::new(InMemorySessionCache::new()), &config.session);
    let llm = Arc::new(HttpLlmClient::from_config(&config.llm));

    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        credentials,
        conversations,
        user_integrations,
        llm,
        sessions,
    ));

    Ok(Application { config, db_pool, orchestrator, refresher })
}

#[cfg(test)]
mod tests {
    use majordome_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn in_memory_options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_and_runtime() {
        let app = bootstrap(in_memory_options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('users', 'integrations', 'user_integrations', 'conversations', 'messages')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables should exist after bootstrap");
        assert_eq!(table_count, 5, "bootstrap should expose the baseline tables");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_unreachable_database() {
        let result = bootstrap(in_memory_options("sqlite:///nonexistent-dir/majordome.db")).await;
        assert!(result.is_err());
    }
}
