//! HubSpot CRM adapter: contact upsert plus company, deal, note, and task
//! creation against the `/crm/v3/objects` surface.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use majordome_core::domain::intent::{ActionDescriptor, SlotDescriptor, SlotKind};
use majordome_core::schema::{ConfigSchema, FieldDescriptor, FieldKind};
use majordome_core::TokenSet;

use crate::adapter::{
    optional_slot, require_slot, ActionCall, ActionOutcome, AdapterError, RefreshGrant,
    ServiceAdapter,
};
use crate::classify::{classify_transport, error_from_response};
use crate::oauth::refresh_access_token;

const SERVICE: &str = "hubspot";
const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";

const SCHEMA: ConfigSchema = ConfigSchema {
    fields: &[FieldDescriptor {
        name: "portal_id",
        label: "Identifiant du portail",
        kind: FieldKind::Text,
        required: true,
        help: "Fourni par HubSpot lors de la connexion OAuth.",
    }],
};

const ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        name: "upsert_contact",
        slots: &[
            SlotDescriptor {
                name: "email",
                prompt: "Quelle est l'adresse email du contact ?",
                kind: SlotKind::Email,
                required: true,
            },
            SlotDescriptor {
                name: "first_name",
                prompt: "Quel est le prénom du contact ?",
                kind: SlotKind::Text,
                required: false,
            },
            SlotDescriptor {
                name: "last_name",
                prompt: "Quel est le nom du contact ?",
                kind: SlotKind::Text,
                required: false,
            },
            SlotDescriptor {
                name: "phone",
                prompt: "Quel est le numéro de téléphone ?",
                kind: SlotKind::Text,
                required: false,
            },
        ],
        requires_confirmation: false,
    },
    ActionDescriptor {
        name: "create_company",
        slots: &[SlotDescriptor {
            name: "name",
            prompt: "Quel est le nom de l'entreprise ?",
            kind: SlotKind::Text,
            required: true,
        }],
        requires_confirmation: false,
    },
    ActionDescriptor {
        name: "create_deal",
        slots: &[
            SlotDescriptor {
                name: "name",
                prompt: "Quel est le nom de la transaction ?",
                kind: SlotKind::Text,
                required: true,
            },
            SlotDescriptor {
                name: "amount",
                prompt: "Quel est le montant ?",
                kind: SlotKind::Text,
                required: false,
            },
        ],
        requires_confirmation: false,
    },
    ActionDescriptor {
        name: "create_note",
        slots: &[SlotDescriptor {
            name: "body",
            prompt: "Quel est le contenu de la note ?",
            kind: SlotKind::Text,
            required: true,
        }],
        requires_confirmation: false,
    },
    ActionDescriptor {
        name: "create_task",
        slots: &[
            SlotDescriptor {
                name: "title",
                prompt: "Quel est l'intitulé de la tâche ?",
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
    },
];

pub struct HubspotAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HubspotAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into() }
    }

    /// Create-or-update by email: a lookup with `idProperty=email` decides
    /// between PATCH and POST, visible externally as a single upsert.
    async fn upsert_contact(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        let email = require_slot(call.params, "email")?;
        let properties = contact_properties(call);
        let lookup_url = format!(
            "{}/crm/v3/objects/contacts/{}?idProperty=email",
            self.base_url, email
        );

        let lookup = self
            .client
            .get(&lookup_url)
            .bearer_auth(call.token)
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;

        let display_name = contact_display_name(call.params, email);
        match lookup.status().as_u16() {
            200 => {
                let response = self
                    .client
                    .patch(&lookup_url)
                    .bearer_auth(call.token)
                    .json(&json!({ "properties": properties }))
                    .send()
                    .await
                    .map_err(|error| classify_transport(SERVICE, &error))?;
                if !response.status().is_success() {
                    return Err(error_from_response(SERVICE, response).await);
                }
                let data: Value = response.json().await.unwrap_or(Value::Null);
                Ok(ActionOutcome::new(
                    format!("Le contact {display_name} a été mis à jour dans HubSpot."),
                    json!({ "outcome": "updated", "contact": data }),
                ))
            }
            404 => {
                let response = self
                    .client
                    .post(format!("{}/crm/v3/objects/contacts", self.base_url))
                    .bearer_auth(call.token)
                    .json(&json!({ "properties": properties }))
                    .send()
                    .await
                    .map_err(|error| classify_transport(SERVICE, &error))?;
                if !response.status().is_success() {
                    return Err(error_from_response(SERVICE, response).await);
                }
                let data: Value = response.json().await.unwrap_or(Value::Null);
                Ok(ActionOutcome::new(
                    format!("Le contact {display_name} a été créé dans HubSpot."),
                    json!({ "outcome": "created", "contact": data }),
                ))
            }
            _ => Err(error_from_response(SERVICE, lookup).await),
        }
    }

    async fn create_object(
        &self,
        call: ActionCall<'_>,
        object_type: &str,
        properties: Value,
        reply: String,
    ) -> Result<ActionOutcome, AdapterError> {
        let response = self
            .client
            .post(format!("{}/crm/v3/objects/{object_type}", self.base_url))
            .bearer_auth(call.token)
            .json(&json!({ "properties": properties }))
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let data: Value = response.json().await.unwrap_or(Value::Null);
        Ok(ActionOutcome::new(reply, data))
    }
}

fn contact_properties(call: ActionCall<'_>) -> Value {
    let mut properties = serde_json::Map::new();
    if let Some(email) = optional_slot(call.params, "email") {
        properties.insert("email".to_string(), json!(email));
    }
    if let Some(first_name) = optional_slot(call.params, "first_name") {
        properties.insert("firstname".to_string(), json!(first_name));
    }
    if let Some(last_name) = optional_slot(call.params, "last_name") {
        properties.insert("lastname".to_string(), json!(last_name));
    }
    if let Some(phone) = optional_slot(call.params, "phone") {
        properties.insert("phone".to_string(), json!(phone));
    }
    Value::Object(properties)
}

fn contact_display_name(params: &majordome_core::SlotValues, email: &str) -> String {
    match (optional_slot(params, "first_name"), optional_slot(params, "last_name")) {
        (Some(first), Some(last)) => format!("{first} {last}"),
        (Some(first), None) => first.to_string(),
        (None, Some(last)) => last.to_string(),
        (None, None) => email.to_string(),
    }
}

#[async_trait]
impl ServiceAdapter for HubspotAdapter {
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
            &format!("{}/oauth/v1/token", self.base_url),
            grant,
            Utc::now(),
        )
        .await
    }

    async fn verify(&self, token: &str) -> Result<(), AdapterError> {
        let response = self
            .client
            .get(format!("{}/crm/v3/objects/contacts?limit=1", self.base_url))
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
            "upsert_contact" => self.upsert_contact(call).await,
            "create_company" => {
                let name = require_slot(call.params, "name")?;
                self.create_object(
                    call,
                    "companies",
                    json!({ "name": name }),
                    format!("L'entreprise {name} a été créée dans HubSpot."),
                )
                .await
            }
            "create_deal" => {
                let name = require_slot(call.params, "name")?;
                let mut properties = serde_json::Map::new();
                properties.insert("dealname".to_string(), json!(name));
                if let Some(amount) = optional_slot(call.params, "amount") {
                    properties.insert("amount".to_string(), json!(amount));
                }
                self.create_object(
                    call,
                    "deals",
                    Value::Object(properties),
                    format!("La transaction {name} a été créée dans HubSpot."),
                )
                .await
            }
            "create_note" => {
                let body = require_slot(call.params, "body")?;
                self.create_object(
                    call,
                    "notes",
                    json!({ "hs_note_body": body }),
                    "La note a été ajoutée dans HubSpot.".to_string(),
                )
                .await
            }
            "create_task" => {
                let title = require_slot(call.params, "title")?;
                let mut properties = serde_json::Map::new();
                properties.insert("hs_task_subject".to_string(), json!(title));
                if let Some(raw) = optional_slot(call.params, "due_date") {
                    if let Some(due) =
                        majordome_core::dates::parse_due_date(raw, Utc::now().date_naive())
                    {
                        properties.insert(
                            "hs_timestamp".to_string(),
                            json!(due.format("%Y-%m-%dT%H:%M:%S").to_string()),
                        );
                    }
                }
                self.create_object(
                    call,
                    "tasks",
                    Value::Object(properties),
                    format!("La tâche « {title} » a été créée dans HubSpot."),
                )
                .await
            }
            other => {
                Err(AdapterError::schema(format!("action inconnue pour {SERVICE} : {other}")))
            }
        }
    }
}
