use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub refresher: RefresherConfig,
    pub oauth: OAuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub history_limit: usize,
    pub cache_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RefresherConfig {
    pub interval_secs: u64,
    pub expiry_window_secs: u64,
}

/// OAuth client credentials per service. A service without client id and
/// secret cannot be refreshed in the background, but already-valid tokens
/// keep working for one-shot calls.
#[derive(Clone, Debug, Default)]
pub struct OAuthConfig {
    pub hubspot: OAuthClient,
    pub slack: OAuthClient,
    pub trello: OAuthClient,
    pub google: OAuthClient,
    pub quickbooks: OAuthClient,
}

#[derive(Clone, Debug, Default)]
pub struct OAuthClient {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
}

impl OAuthClient {
    pub fn is_configured(&self) -> bool {
        self.client_id.as_deref().is_some_and(|id| !id.is_empty())
            && self.client_secret.is_some()
    }
}

impl OAuthConfig {
    /// Resolve the client credentials for a canonical service name. Gmail
    /// and Drive share the Google client.
    pub fn client_for(&self, service: &str) -> Option<&OAuthClient> {
        match service {
            "hubspot" => Some(&self.hubspot),
            "slack" => Some(&self.slack),
            "trello" => Some(&self.trello),
            "gmail" | "drive" => Some(&self.google),
            "quickbooks" => Some(&self.quickbooks),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub session_cache_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://majordome.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            session: SessionConfig {
                idle_timeout_secs: 3600,
                history_limit: 40,
                cache_url: None,
            },
            refresher: RefresherConfig { interval_secs: 900, expiry_window_secs: 3600 },
            oauth: OAuthConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    session: Option<SessionPatch>,
    refresher: Option<RefresherPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    idle_timeout_secs: Option<u64>,
    history_limit: Option<usize>,
    cache_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RefresherPatch {
    interval_secs: Option<u64>,
    expiry_window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("majordome.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(idle_timeout_secs) = session.idle_timeout_secs {
                self.session.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(history_limit) = session.history_limit {
                self.session.history_limit = history_limit;
            }
            if let Some(cache_url) = session.cache_url {
                self.session.cache_url = Some(cache_url);
            }
        }

        if let Some(refresher) = patch.refresher {
            if let Some(interval_secs) = refresher.interval_secs {
                self.refresher.interval_secs = interval_secs;
            }
            if let Some(expiry_window_secs) = refresher.expiry_window_secs {
                self.refresher.expiry_window_secs = expiry_window_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MAJORDOME_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(level) = lookup("MAJORDOME_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(raw) = lookup("MAJORDOME_LOG_FORMAT") {
            self.logging.format = raw.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "MAJORDOME_LOG_FORMAT".to_string(),
                value: raw,
            })?;
        }
        if let Some(llm_api_key_value) = lookup("MAJORDOME_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(llm_api_key_value));
        }
        if let Some(base_url) = lookup("MAJORDOME_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(model) = lookup("MAJORDOME_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(cache_url) = lookup("MAJORDOME_SESSION_CACHE_URL") {
            self.session.cache_url = Some(cache_url);
        }
        if let Some(raw) = lookup("MAJORDOME_REFRESH_INTERVAL_SECS") {
            self.refresher.interval_secs =
                raw.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "MAJORDOME_REFRESH_INTERVAL_SECS".to_string(),
                    value: raw,
                })?;
        }

        for (client, prefix) in [
            (&mut self.oauth.hubspot, "HUBSPOT"),
            (&mut self.oauth.slack, "SLACK"),
            (&mut self.oauth.trello, "TRELLO"),
            (&mut self.oauth.google, "GOOGLE"),
            (&mut self.oauth.quickbooks, "QUICKBOOKS"),
        ] {
            if let Some(id) = lookup(&format!("{prefix}_CLIENT_ID")) {
                client.client_id = Some(id);
            }
            if let Some(oauth_client_secret_value) = lookup(&format!("{prefix}_CLIENT_SECRET")) {
                client.client_secret = Some(secret_value(oauth_client_secret_value));
            }
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.database_url {
            self.database.url = url;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(base_url) = overrides.llm_base_url {
            self.llm.base_url = base_url;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(llm_api_key_value) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key_value));
        }
        if let Some(cache_url) = overrides.session_cache_url {
            self.session.cache_url = Some(cache_url);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(ConfigError::Validation("llm.base_url must not be empty".to_string()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Validation("llm.timeout_secs must be positive".to_string()));
        }
        if self.session.idle_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "session.idle_timeout_secs must be positive".to_string(),
            ));
        }
        if self.session.history_limit == 0 {
            return Err(ConfigError::Validation(
                "session.history_limit must be at least 1".to_string(),
            ));
        }
        if self.refresher.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "refresher.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("majordome.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}
