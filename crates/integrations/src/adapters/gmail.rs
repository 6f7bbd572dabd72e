//! Gmail adapter: builds an RFC 2822 message, base64url-encodes it, and
//! hands it to `users/me/messages/send`.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};

use majordome_core::domain::intent::{ActionDescriptor, SlotDescriptor, SlotKind};
use majordome_core::schema::ConfigSchema;
use majordome_core::TokenSet;

use crate::adapter::{
    optional_slot, require_slot, ActionCall, ActionOutcome, AdapterError, RefreshGrant,
    ServiceAdapter,
};
use crate::classify::{classify_transport, error_from_response};
use crate::oauth::refresh_access_token;

const SERVICE: &str = "gmail";
const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
    name: "send_email",
    slots: &[
        SlotDescriptor {
            name: "to",
            prompt: "À quelle adresse dois-je envoyer l'email ?",
            kind: SlotKind::Email,
            required: true,
        },
        SlotDescriptor {
            name: "subject",
            prompt: "Quel est l'objet de l'email ?",
            kind: SlotKind::Text,
            required: true,
        },
        SlotDescriptor {
            name: "body",
            prompt: "Quel est le contenu de l'email ?",
            kind: SlotKind::Text,
            required: true,
        },
    ],
    requires_confirmation: true,
}];

/// Assemble the MIME message. Headers stay ASCII-clean: the subject is
/// wrapped in an RFC 2047 encoded word so accented French survives transport.
pub fn build_mime(to: &str, subject: &str, body: &str, html: bool) -> String {
    let content_type =
        if html { "text/html; charset=utf-8" } else { "text/plain; charset=utf-8" };
    let encoded_subject = format!("=?utf-8?B?{}?=", STANDARD.encode(subject));
    format!(
        "To: {to}\r\nSubject: {encoded_subject}\r\nMIME-Version: 1.0\r\nContent-Type: {content_type}\r\n\r\n{body}"
    )
}

/// Wire form expected by the Gmail API: base64url without padding.
pub fn encode_raw(mime: &str) -> String {
    URL_SAFE_NO_PAD.encode(mime.as_bytes())
}

/// Crude HTML sniff: callers may pass a body that is already marked up.
pub fn looks_like_html(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with('<') && body.contains("</")
}

pub struct GmailAdapter {
    client: reqwest::Client,
    base_url: String,
    token_url: String,
}

impl GmailAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self { client, token_url: format!("{base_url}/token"), base_url }
    }

    async fn send_email(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        let to = require_slot(call.params, "to")?;
        let subject = require_slot(call.params, "subject")?;
        let body = require_slot(call.params, "body")?;
        let html = optional_slot(call.params, "format")
            .map(|format| format.eq_ignore_ascii_case("html"))
            .unwrap_or_else(|| looks_like_html(body));

        let raw = encode_raw(&build_mime(to, subject, body, html));
        let response = self
            .client
            .post(format!("{}/gmail/v1/users/me/messages/send", self.base_url))
            .bearer_auth(call.token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let data: Value = response.json().await.unwrap_or(Value::Null);
        Ok(ActionOutcome::new(
            format!("Email « {subject} » envoyé à {to}."),
            data,
        ))
    }
}

#[async_trait]
impl ServiceAdapter for GmailAdapter {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn schema(&self) -> &ConfigSchema {
        &ConfigSchema::EMPTY
    }

    fn actions(&self) -> &'static [ActionDescriptor] {
        ACTIONS
    }

    async fn refresh(&self, grant: RefreshGrant<'_>) -> Result<TokenSet, AdapterError> {
        refresh_access_token(&self.client, SERVICE, &self.token_url, grant, Utc::now()).await
    }

    async fn verify(&self, token: &str) -> Result<(), AdapterError> {
        let response = self
            .client
            .get(format!("{}/gmail/v1/users/me/profile", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(SERVICE, response).await)
        }
    }

    async fn execute(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        match call.action {
            "send_email" => self.send_email(call).await,
            other => {
                Err(AdapterError::schema(format!("action inconnue pour {SERVICE} : {other}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    use super::{build_mime, encode_raw, looks_like_html};

    #[test]
    fn mime_message_carries_headers_and_body() {
        let mime = build_mime("jean@example.com", "Point projet", "Bonjour Jean,", false);
        assert!(mime.starts_with("To: jean@example.com\r\n"));
        assert!(mime.contains("Content-Type: text/plain; charset=utf-8"));
        assert!(mime.ends_with("\r\n\r\nBonjour Jean,"));
    }

    #[test]
    fn subject_is_rfc2047_encoded() {
        let mime = build_mime("a@b.fr", "Réunion d'équipe", "corps", false);
        assert!(mime.contains("Subject: =?utf-8?B?"));
        assert!(!mime.contains("Subject: Réunion"));
    }

    #[test]
    fn html_bodies_switch_the_content_type() {
        let mime = build_mime("a@b.fr", "s", "<p>Bonjour</p>", true);
        assert!(mime.contains("Content-Type: text/html; charset=utf-8"));
    }

    #[test]
    fn raw_encoding_is_base64url_without_padding() {
        let encoded = encode_raw("subject?>");
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        let decoded = URL_SAFE_NO_PAD.decode(encoded.as_bytes()).expect("decodable");
        assert_eq!(decoded, b"subject?>");
    }

    #[test]
    fn html_sniffing_requires_opening_and_closing_tags() {
        assert!(looks_like_html("<p>Bonjour</p>"));
        assert!(!looks_like_html("2 < 3 mais 4 > 1"));
        assert!(!looks_like_html("Bonjour"));
    }
}
