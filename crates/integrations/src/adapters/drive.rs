//! Google Drive adapter: file sharing with human-language role synonyms
//! mapped to Drive's `reader`/`commenter`/`writer` at the boundary.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use majordome_core::domain::intent::{ActionDescriptor, SlotDescriptor, SlotKind};
use majordome_core::schema::ConfigSchema;
use majordome_core::TokenSet;

use crate::adapter::{
    require_slot, ActionCall, ActionOutcome, AdapterError, RefreshGrant, ServiceAdapter,
};
use crate::classify::{classify_transport, error_from_response};
use crate::oauth::refresh_access_token;

const SERVICE: &str = "drive";
const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
    name: "share_file",
    slots: &[
        SlotDescriptor {
            name: "file_name",
            prompt: "Quel fichier dois-je partager ?",
            kind: SlotKind::Text,
            required: true,
        },
        SlotDescriptor {
            name: "recipient",
            prompt: "Avec quelle adresse email dois-je le partager ?",
            kind: SlotKind::Email,
            required: true,
        },
        SlotDescriptor {
            name: "role",
            prompt: "Quel droit dois-je accorder ? (lecture, commentaire ou écriture)",
            kind: SlotKind::Text,
            required: true,
        },
    ],
    requires_confirmation: false,
}];

/// Map human spellings (French and English) onto Drive permission roles.
pub fn map_role(raw: &str) -> Result<&'static str, AdapterError> {
    match raw.trim().to_lowercase().as_str() {
        "reader" | "viewer" | "lecteur" | "lecture" | "consultation" => Ok("reader"),
        "commenter" | "commentateur" | "commentaire" | "comment" => Ok("commenter"),
        "writer" | "editor" | "éditeur" | "editeur" | "écriture" | "ecriture" | "edition"
        | "édition" => Ok("writer"),
        other => Err(AdapterError::validation(format!(
            "Je ne connais pas le droit « {other} » : utilisez lecture, commentaire ou écriture."
        ))),
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

pub struct DriveAdapter {
    client: reqwest::Client,
    base_url: String,
    token_url: String,
}

impl DriveAdapter {
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

    async fn list_files(
        &self,
        token: &str,
        query: Option<&str>,
    ) -> Result<Vec<DriveFile>, AdapterError> {
        let mut request = self
            .client
            .get(format!("{}/drive/v3/files", self.base_url))
            .bearer_auth(token)
            .query(&[("pageSize", "10"), ("fields", "files(id,name)")]);
        if let Some(query) = query {
            request = request.query(&[("q", query)]);
        }
        let response =
            request.send().await.map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let listing: FileListResponse = response.json().await.map_err(|error| {
            AdapterError::internal(format!("réponse Drive illisible : {error}"))
        })?;
        Ok(listing.files)
    }

    async fn share_file(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        let file_name = require_slot(call.params, "file_name")?;
        let recipient = require_slot(call.params, "recipient")?;
        let role = map_role(require_slot(call.params, "role")?)?;

        let escaped = file_name.replace('\'', "\\'");
        let matches =
            self.list_files(call.token, Some(&format!("name = '{escaped}'"))).await?;
        let file = match matches.first() {
            Some(file) => file.clone(),
            None => {
                // Cheap alternative enumeration: the user's most recent files.
                let recent = self.list_files(call.token, None).await.unwrap_or_default();
                let names: Vec<&str> = recent.iter().map(|f| f.name.as_str()).collect();
                let hint = if names.is_empty() {
                    String::new()
                } else {
                    format!(" Fichiers récents : {}.", names.join(", "))
                };
                return Err(AdapterError::not_found(format!(
                    "Je ne trouve pas de fichier nommé « {file_name} » dans votre Drive.{hint}"
                )));
            }
        };

        let response = self
            .client
            .post(format!("{}/drive/v3/files/{}/permissions", self.base_url, file.id))
            .bearer_auth(call.token)
            .json(&json!({ "type": "user", "role": role, "emailAddress": recipient }))
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let data: Value = response.json().await.unwrap_or(Value::Null);

        let role_label = match role {
            "reader" => "en lecture",
            "commenter" => "en commentaire",
            _ => "en écriture",
        };
        Ok(ActionOutcome::new(
            format!("« {} » est maintenant partagé {role_label} avec {recipient}.", file.name),
            data,
        ))
    }
}

#[async_trait]
impl ServiceAdapter for DriveAdapter {
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
            .get(format!("{}/drive/v3/about?fields=user", self.base_url))
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
            "share_file" => self.share_file(call).await,
            other => {
                Err(AdapterError::schema(format!("action inconnue pour {SERVICE} : {other}")))
            }
        }
    }
}
