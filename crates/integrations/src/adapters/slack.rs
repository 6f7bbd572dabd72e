//! Slack chat adapter. Slack reports failures inside a 200 response
//! (`{"ok": false, "error": "..."}`), so classification keys off the error
//! string rather than the status code.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use majordome_core::domain::intent::{ActionDescriptor, SlotDescriptor, SlotKind};
use majordome_core::schema::{ConfigSchema, FieldDescriptor, FieldKind};
use majordome_core::TokenSet;

use crate::adapter::{
    require_slot, ActionCall, ActionOutcome, AdapterError, RefreshGrant, ServiceAdapter,
};
use crate::classify::{classify_transport, error_from_response};
use crate::oauth::refresh_access_token;

const SERVICE: &str = "slack";
const DEFAULT_BASE_URL: &str = "https://slack.com/api";

const SCHEMA: ConfigSchema = ConfigSchema {
    fields: &[FieldDescriptor {
        name: "team_id",
        label: "Identifiant de l'espace de travail",
        kind: FieldKind::Text,
        required: false,
        help: "Renseigné automatiquement lors de la connexion OAuth.",
    }],
};

const ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
    name: "post_message",
    slots: &[
        SlotDescriptor {
            name: "channel",
            prompt: "Dans quel canal dois-je publier le message ?",
            kind: SlotKind::Text,
            required: true,
        },
        SlotDescriptor {
            name: "message",
            prompt: "Quel message dois-je publier ?",
            kind: SlotKind::Text,
            required: true,
        },
    ],
    requires_confirmation: false,
}];

pub struct SlackAdapter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SlackEnvelope {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    channels: Vec<SlackChannel>,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SlackChannel {
    pub id: String,
    pub name: String,
}

/// Map a Slack API error string onto the taxonomy, naming the channel so the
/// orchestrator can explain precisely.
pub fn classify_slack_error(error: &str, channel: &str) -> AdapterError {
    match error {
        "not_in_channel" => AdapterError::permission(format!(
            "Je ne suis pas membre du canal #{channel} : invitez le robot puis réessayez."
        )),
        "channel_not_found" => AdapterError::not_found(format!(
            "Le canal #{channel} n'existe pas ou je n'y ai pas accès, vérifiez le nom."
        )),
        "is_archived" => AdapterError::permission(format!("Le canal #{channel} est archivé.")),
        "ratelimited" | "service_unavailable" => {
            AdapterError::transport(format!("Slack est temporairement indisponible ({error})"))
        }
        "invalid_auth" | "token_expired" | "token_revoked" | "account_inactive" => {
            AdapterError::reauthorize("l'accès à Slack a expiré".to_string())
        }
        other => AdapterError::internal(format!("Slack a renvoyé une erreur inattendue : {other}")),
    }
}

/// Case-insensitive channel-name resolution over the workspace channel list.
pub fn resolve_channel<'a>(channels: &'a [SlackChannel], wanted: &str) -> Option<&'a SlackChannel> {
    let normalized = wanted.trim().trim_start_matches('#').to_lowercase();
    channels.iter().find(|channel| channel.name.to_lowercase() == normalized)
}

impl SlackAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }

    async fn list_channels(&self, token: &str) -> Result<Vec<SlackChannel>, AdapterError> {
        let response = self
            .client
            .get(format!(
                "{}/conversations.list?types=public_channel,private_channel&limit=200",
                self.base_url
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let envelope: SlackEnvelope = response.json().await.map_err(|error| {
            AdapterError::internal(format!("réponse Slack illisible : {error}"))
        })?;
        if !envelope.ok {
            return Err(classify_slack_error(envelope.error.as_deref().unwrap_or("unknown"), ""));
        }
        Ok(envelope.channels)
    }

    async fn post_message(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        let channel_name = require_slot(call.params, "channel")?;
        let text = require_slot(call.params, "message")?;

        let channels = self.list_channels(call.token).await?;
        let channel = resolve_channel(&channels, channel_name)
            .ok_or_else(|| classify_slack_error("channel_not_found", channel_name.trim_start_matches('#')))?;

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(call.token)
            .json(&json!({ "channel": channel.id, "text": text }))
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let envelope: SlackEnvelope = response.json().await.map_err(|error| {
            AdapterError::internal(format!("réponse Slack illisible : {error}"))
        })?;
        if !envelope.ok {
            return Err(classify_slack_error(
                envelope.error.as_deref().unwrap_or("unknown"),
                &channel.name,
            ));
        }

        Ok(ActionOutcome::new(
            format!("Message publié dans #{}.", channel.name),
            Value::Object(envelope.rest),
        ))
    }
}

#[async_trait]
impl ServiceAdapter for SlackAdapter {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn schema(&self) -> &ConfigSchema {
        &SCHEMA
    }

    fn actions(&self) -> &'static [ActionDescriptor] {
        ACTIONS
    }

    async fn refresh(&self, grant: RefreshGrant<'_>) -> Result<TokenSet, AdapterError> {
        refresh_access_token(
            &self.client,
            SERVICE,
            &format!("{}/oauth.v2.access", self.base_url),
            grant,
            Utc::now(),
        )
        .await
    }

    async fn verify(&self, token: &str) -> Result<(), AdapterError> {
        let response = self
            .client
            .post(format!("{}/auth.test", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let envelope: SlackEnvelope = response.json().await.map_err(|error| {
            AdapterError::internal(format!("réponse Slack illisible : {error}"))
        })?;
        if envelope.ok {
            Ok(())
        } else {
            Err(classify_slack_error(envelope.error.as_deref().unwrap_or("unknown"), ""))
        }
    }

    async fn execute(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        match call.action {
            "post_message" => self.post_message(call).await,
            other => {
                Err(AdapterError::schema(format!("action inconnue pour {SERVICE} : {other}")))
            }
        }
    }
}
