//! Trello project-board adapter. Card creation resolves list names and
//! member usernames against the active board, and accepts a handful of
//! natural-language due-date tokens.
//!
//! Trello authenticates with an API key and a member token passed as query
//! parameters; the key lives in the user's config map, the token in the
//! credential store.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use majordome_core::dates::parse_due_date;
use majordome_core::domain::intent::{ActionDescriptor, SlotDescriptor, SlotKind};
use majordome_core::schema::{ConfigSchema, FieldDescriptor, FieldKind};
use majordome_core::TokenSet;

use crate::adapter::{
    optional_slot, require_slot, ActionCall, ActionOutcome, AdapterError, JsonMap, RefreshGrant,
    ServiceAdapter,
};
use crate::classify::{classify_transport, error_from_response};

const SERVICE: &str = "trello";
const DEFAULT_BASE_URL: &str = "https://api.trello.com";

const SCHEMA: ConfigSchema = ConfigSchema {
    fields: &[
        FieldDescriptor {
            name: "api_key",
            label: "Clé d'API",
            kind: FieldKind::Secret,
            required: true,
            help: "Générée sur trello.com/power-ups/admin.",
        },
        FieldDescriptor {
            name: "board_id",
            label: "Tableau par défaut",
            kind: FieldKind::Text,
            required: false,
            help: "Identifiant du tableau utilisé quand aucun n'est précisé.",
        },
    ],
};

const ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
    name: "create_card",
    slots: &[
        SlotDescriptor {
            name: "title",
            prompt: "Quel est le titre de la tâche ?",
            kind: SlotKind::Text,
            required: true,
        },
        SlotDescriptor {
            name: "list_name",
            prompt: "Dans quelle liste du tableau dois-je créer la tâche ?",
            kind: SlotKind::Text,
            required: true,
        },
        SlotDescriptor {
            name: "member",
            prompt: "À qui dois-je assigner la tâche ? (ou « personne »)",
            kind: SlotKind::Text,
            required: true,
        },
        SlotDescriptor {
            name: "due_date",
            prompt: "Pour quelle échéance ? (aujourd'hui, demain, vendredi...)",
            kind: SlotKind::DueDate,
            required: false,
        },
    ],
    requires_confirmation: false,
}];

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BoardList {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BoardMember {
    pub id: String,
    pub username: String,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
}

/// Case-insensitive list-name resolution on the board.
pub fn resolve_list<'a>(lists: &'a [BoardList], wanted: &str) -> Option<&'a BoardList> {
    let normalized = wanted.trim().to_lowercase();
    lists.iter().find(|list| list.name.to_lowercase() == normalized)
}

/// Member resolution by username or full name, case-insensitive.
pub fn resolve_member<'a>(members: &'a [BoardMember], wanted: &str) -> Option<&'a BoardMember> {
    let normalized = wanted.trim().trim_start_matches('@').to_lowercase();
    members.iter().find(|member| {
        member.username.to_lowercase() == normalized
            || member.full_name.to_lowercase() == normalized
            || member
                .full_name
                .split_whitespace()
                .any(|part| part.to_lowercase() == normalized)
    })
}

fn board_id<'a>(config: &'a JsonMap, scratch: &'a JsonMap) -> Result<&'a str, AdapterError> {
    scratch
        .get("board_id")
        .and_then(Value::as_str)
        .or_else(|| config.get("board_id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            AdapterError::schema(
                "aucun tableau Trello actif : précisez un tableau avant de créer une tâche"
                    .to_string(),
            )
        })
}

pub struct TrelloAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl TrelloAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }

    fn auth_query<'a>(
        config: &'a JsonMap,
        token: &'a str,
    ) -> Result<[(&'static str, &'a str); 2], AdapterError> {
        let api_key = config.get("api_key").and_then(Value::as_str).ok_or_else(|| {
            AdapterError::schema("configuration incomplète pour trello : api_key".to_string())
        })?;
        Ok([("key", api_key), ("token", token)])
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        auth: &[(&str, &str)],
    ) -> Result<T, AdapterError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(auth)
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        response.json().await.map_err(|error| {
            AdapterError::internal(format!("réponse Trello illisible : {error}"))
        })
    }

    async fn create_card(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        let title = require_slot(call.params, "title")?;
        let list_name = require_slot(call.params, "list_name")?;
        let board = board_id(call.config, call.scratch)?;
        let auth = Self::auth_query(call.config, call.token)?;

        let lists: Vec<BoardList> =
            self.fetch(&format!("/1/boards/{board}/lists"), &auth).await?;
        let list = resolve_list(&lists, list_name).ok_or_else(|| {
            let available: Vec<&str> = lists.iter().map(|l| l.name.as_str()).collect();
            AdapterError::not_found(format!(
                "La liste « {list_name} » n'existe pas sur ce tableau. Listes disponibles : {}.",
                available.join(", ")
            ))
        })?;

        let mut member_id: Option<String> = None;
        let mut assignee_name: Option<String> = None;
        if let Some(member) = optional_slot(call.params, "member") {
            if !member.eq_ignore_ascii_case("personne") {
                let members: Vec<BoardMember> =
                    self.fetch(&format!("/1/boards/{board}/members"), &auth).await?;
                let resolved = resolve_member(&members, member).ok_or_else(|| {
                    let available: Vec<&str> =
                        members.iter().map(|m| m.username.as_str()).collect();
                    AdapterError::not_found(format!(
                        "Je ne trouve pas « {member} » sur ce tableau. Membres : {}.",
                        available.join(", ")
                    ))
                })?;
                member_id = Some(resolved.id.clone());
                assignee_name = Some(if resolved.full_name.is_empty() {
                    resolved.username.clone()
                } else {
                    resolved.full_name.clone()
                });
            }
        }

        let due = optional_slot(call.params, "due_date")
            .and_then(|raw| parse_due_date(raw, Utc::now().date_naive()))
            .map(|date| date.format("%Y-%m-%dT%H:%M:%S").to_string());

        let mut body = serde_json::Map::new();
        body.insert("idList".to_string(), json!(list.id));
        body.insert("name".to_string(), json!(title));
        if let Some(id) = &member_id {
            body.insert("idMembers".to_string(), json!([id]));
        }
        if let Some(due) = &due {
            body.insert("due".to_string(), json!(due));
        }

        let response = self
            .client
            .post(format!("{}/1/cards", self.base_url))
            .query(&auth)
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let card: Value = response.json().await.unwrap_or(Value::Null);

        let mut reply =
            format!("La tâche « {title} » a été créée dans la liste {}.", list.name);
        if let Some(name) = assignee_name {
            reply.push_str(&format!(" Assignée à {name}."));
        }
        Ok(ActionOutcome::new(reply, card))
    }
}

#[async_trait]
impl ServiceAdapter for TrelloAdapter {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn schema(&self) -> &ConfigSchema {
        &SCHEMA
    }

    fn actions(&self) -> &'static [ActionDescriptor] {
        ACTIONS
    }

    async fn refresh(&self, _grant: RefreshGrant<'_>) -> Result<TokenSet, AdapterError> {
        // Trello member tokens are long-lived and have no refresh grant; a
        // dead token means the user must reconnect.
        Err(AdapterError::reauthorize(
            "Trello ne renouvelle pas ses jetons : reconnectez l'intégration".to_string(),
        ))
    }

    async fn verify(&self, token: &str) -> Result<(), AdapterError> {
        // Without the per-user API key a bare probe cannot authenticate;
        // reachability of the API host is the useful signal here.
        let response = self
            .client
            .get(format!("{}/1/members/me?token={token}", self.base_url))
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
            "create_card" => self.create_card(call).await,
            other => {
                Err(AdapterError::schema(format!("action inconnue pour {SERVICE} : {other}")))
            }
        }
    }
}
