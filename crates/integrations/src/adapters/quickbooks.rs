//! QuickBooks accounting adapter: financial reports plus invoice and bill
//! queries. Refresh goes through Intuit's bearer endpoint, which expects the
//! client pair as HTTP basic auth rather than form fields.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use majordome_core::domain::intent::{ActionDescriptor, SlotDescriptor, SlotKind};
use majordome_core::schema::{ConfigSchema, FieldDescriptor, FieldKind};
use majordome_core::TokenSet;

use crate::adapter::{
    optional_slot, require_slot, ActionCall, ActionOutcome, AdapterError, JsonMap, RefreshGrant,
    ServiceAdapter,
};
use crate::classify::{classify_transport, error_from_response, is_permanent_refresh_failure, kind_for_status};
use crate::oauth::token_set_from_parts;

const SERVICE: &str = "quickbooks";
const DEFAULT_BASE_URL: &str = "https://quickbooks.api.intuit.com";
const DEFAULT_TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

const SCHEMA: ConfigSchema = ConfigSchema {
    fields: &[FieldDescriptor {
        name: "realm_id",
        label: "Identifiant de société",
        kind: FieldKind::Text,
        required: true,
        help: "Le realm id QuickBooks transmis lors de la connexion OAuth.",
    }],
};

const ACTIONS: &[ActionDescriptor] = &[
    ActionDescriptor {
        name: "financial_report",
        slots: &[SlotDescriptor {
            name: "report_type",
            prompt: "Quel rapport souhaitez-vous ? (compte de résultat ou bilan)",
            kind: SlotKind::Text,
            required: true,
        }],
        requires_confirmation: false,
    },
    ActionDescriptor {
        name: "list_invoices",
        slots: &[SlotDescriptor {
            name: "customer",
            prompt: "Pour quel client ? (ou « tous »)",
            kind: SlotKind::Text,
            required: false,
        }],
        requires_confirmation: false,
    },
    ActionDescriptor { name: "list_bills", slots: &[], requires_confirmation: false },
];

/// Map French and English report spellings onto QuickBooks report names.
pub fn map_report_type(raw: &str) -> Result<&'static str, AdapterError> {
    let normalized = raw.trim().to_lowercase();
    if normalized.contains("résultat")
        || normalized.contains("resultat")
        || normalized.contains("profit")
        || normalized == "p&l"
        || normalized == "pnl"
    {
        return Ok("ProfitAndLoss");
    }
    if normalized.contains("bilan") || normalized.contains("balance") {
        return Ok("BalanceSheet");
    }
    Err(AdapterError::validation(format!(
        "Je ne connais pas le rapport « {raw} » : demandez le compte de résultat ou le bilan."
    )))
}

/// Sum of `TotalAmt` over a QuickBooks query response entity list.
pub fn total_amount(entities: &[Value]) -> f64 {
    entities
        .iter()
        .filter_map(|entity| entity.get("TotalAmt").and_then(Value::as_f64))
        .sum()
}

fn realm_id(config: &JsonMap) -> Result<&str, AdapterError> {
    config.get("realm_id").and_then(Value::as_str).filter(|id| !id.is_empty()).ok_or_else(
        || AdapterError::schema("configuration incomplète pour quickbooks : realm_id".to_string()),
    )
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

pub struct QuickbooksAdapter {
    client: reqwest::Client,
    base_url: String,
    token_url: String,
}

impl QuickbooksAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self { client, token_url: format!("{base_url}/tokens/bearer"), base_url }
    }

    async fn query(
        &self,
        call: ActionCall<'_>,
        statement: &str,
    ) -> Result<Vec<Value>, AdapterError> {
        let realm = realm_id(call.config)?;
        let response = self
            .client
            .get(format!("{}/v3/company/{realm}/query", self.base_url))
            .bearer_auth(call.token)
            .query(&[("query", statement)])
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let payload: Value = response.json().await.map_err(|error| {
            AdapterError::internal(format!("réponse QuickBooks illisible : {error}"))
        })?;

        let entity = statement.split_whitespace().last().unwrap_or_default();
        Ok(payload
            .pointer(&format!("/QueryResponse/{entity}"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn financial_report(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        let report = map_report_type(require_slot(call.params, "report_type")?)?;
        let realm = realm_id(call.config)?;
        let response = self
            .client
            .get(format!("{}/v3/company/{realm}/reports/{report}", self.base_url))
            .bearer_auth(call.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if !response.status().is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }
        let data: Value = response.json().await.unwrap_or(Value::Null);
        let label = if report == "ProfitAndLoss" { "compte de résultat" } else { "bilan" };
        Ok(ActionOutcome::new(format!("Voici votre {label} QuickBooks."), data))
    }

    async fn list_invoices(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        let mut invoices = self.query(call, "SELECT * FROM Invoice").await?;
        if let Some(customer) = optional_slot(call.params, "customer")
            .filter(|customer| !customer.eq_ignore_ascii_case("tous"))
        {
            let wanted = customer.to_lowercase();
            invoices.retain(|invoice| {
                invoice
                    .pointer("/CustomerRef/name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.to_lowercase().contains(&wanted))
            });
        }
        let total = total_amount(&invoices);
        Ok(ActionOutcome::new(
            format!("{} facture(s) trouvée(s), pour un total de {total:.2}.", invoices.len()),
            json!({ "invoices": invoices }),
        ))
    }

    async fn list_bills(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        let bills = self.query(call, "SELECT * FROM Bill").await?;
        let total = total_amount(&bills);
        Ok(ActionOutcome::new(
            format!("{} dépense(s) fournisseur trouvée(s), pour un total de {total:.2}.", bills.len()),
            json!({ "bills": bills }),
        ))
    }
}

#[async_trait]
impl ServiceAdapter for QuickbooksAdapter {
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
        let basic = STANDARD.encode(format!("{}:{}", grant.client_id, grant.client_secret));
        let response = self
            .client
            .post(&self.token_url)
            .header("Authorization", format!("Basic {basic}"))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", grant.refresh_token)])
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_permanent_refresh_failure(&body) {
                return Err(AdapterError::reauthorize(
                    "le jeton de renouvellement QuickBooks n'est plus valide".to_string(),
                ));
            }
            return Err(AdapterError::new(
                kind_for_status(status),
                format!("le point de jeton quickbooks a répondu {status}"),
            ));
        }

        let token: RefreshResponse = response.json().await.map_err(|error| {
            AdapterError::internal(format!("réponse de jeton quickbooks illisible : {error}"))
        })?;
        token_set_from_parts(
            SERVICE,
            token.access_token,
            token.refresh_token,
            token.expires_in,
            Utc::now(),
        )
    }

    async fn verify(&self, token: &str) -> Result<(), AdapterError> {
        // The company endpoint needs the realm id, which only lives in user
        // config; a preflight against the query surface covers auth.
        let response = self
            .client
            .get(format!("{}/v3/company/me/companyinfo/me", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| classify_transport(SERVICE, &error))?;
        if response.status().is_success() || response.status().as_u16() == 400 {
            Ok(())
        } else {
            Err(error_from_response(SERVICE, response).await)
        }
    }

    async fn execute(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
        match call.action {
            "financial_report" => self.financial_report(call).await,
            "list_invoices" => self.list_invoices(call).await,
            "list_bills" => self.list_bills(call).await,
            other => {
                Err(AdapterError::schema(format!("action inconnue pour {SERVICE} : {other}")))
            }
        }
    }
}
