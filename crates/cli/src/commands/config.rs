use majordome_core::config::{AppConfig, LoadOptions, OAuthClient};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ConfigReport {
    database_url: String,
    llm_base_url: String,
    llm_model: String,
    llm_api_key: &'static str,
    server_bind: String,
    session_idle_timeout_secs: u64,
    refresher_interval_secs: u64,
    oauth_clients: Vec<OAuthClientReport>,
    log_level: String,
}

#[derive(Debug, Serialize)]
struct OAuthClientReport {
    service: &'static str,
    configured: bool,
}

fn redact_presence(present: bool) -> &'static str {
    if present {
        "<redacted>"
    } else {
        "<unset>"
    }
}

fn client_report(service: &'static str, client: &OAuthClient) -> OAuthClientReport {
    OAuthClientReport { service, configured: client.is_configured() }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return format!("{{\"status\":\"error\",\"message\":\"{error}\"}}");
        }
    };

    let report = ConfigReport {
        database_url: config.database.url.clone(),
        llm_base_url: config.llm.base_url.clone(),
        llm_model: config.llm.model.clone(),
        llm_api_key: redact_presence(config.llm.api_key.is_some()),
        server_bind: format!("{}:{}", config.server.bind_address, config.server.port),
        session_idle_timeout_secs: config.session.idle_timeout_secs,
        refresher_interval_secs: config.refresher.interval_secs,
        oauth_clients: vec![
            client_report("hubspot", &config.oauth.hubspot),
            client_report("slack", &config.oauth.slack),
            client_report("trello", &config.oauth.trello),
            client_report("google", &config.oauth.google),
            client_report("quickbooks", &config.oauth.quickbooks),
        ],
        log_level: config.logging.level.clone(),
    };

    serde_json::to_string_pretty(&report)
        .unwrap_or_else(|error| format!("{{\"status\":\"error\",\"message\":\"{error}\"}}"))
}
