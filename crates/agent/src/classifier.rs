//! Two-stage intent classifier.
//!
//! Stage 1 scans the utterance for per-service strong indicators (verb+noun
//! trigger phrases, `#channel` markers) and a weighted keyword table. A
//! clear winner becomes an integration intent without any LLM involvement;
//! several mid-score candidates become an ambiguity the user resolves.
//!
//! Stage 2 asks the language model for a JSON object and filters the answer
//! against the enabled-service list: the model can never route to a service
//! the user has not connected.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use majordome_core::dates::parse_due_date;
use majordome_core::{Intent, IntegrationIntent, ServiceCandidate, SlotValues};

use crate::llm::LlmClient;
use crate::smalltalk::smalltalk_reply;

/// Keyword score a single service must reach for a clear rule-stage win.
const CLEAR_THRESHOLD: u32 = 6;
/// Minimum keyword score for a service to count as an ambiguity candidate.
const AMBIGUITY_FLOOR: u32 = 3;
/// Lead over the runner-up required for a keyword-only win.
const CLEAR_MARGIN: u32 = 2;
/// Score granted by a strong indicator phrase.
const STRONG_WEIGHT: u32 = 10;

struct ActionRule {
    action: &'static str,
    triggers: &'static [&'static str],
}

struct ServiceProfile {
    service: &'static str,
    actions: &'static [ActionRule],
    keywords: &'static [(&'static str, u32)],
}

const PROFILES: &[ServiceProfile] = &[
    ServiceProfile {
        service: "slack",
        actions: &[ActionRule {
            action: "post_message",
            triggers: &[
                "envoie un message sur",
                "envoie un message dans",
                "poste sur slack",
                "poste dans le canal",
                "publie sur slack",
                "publie dans le canal",
            ],
        }],
        keywords: &[
            ("slack", 8),
            ("canal", 4),
            ("channel", 4),
            ("message", 2),
            ("envoie", 2),
            ("poste", 2),
            ("publie", 2),
            ("équipe", 1),
        ],
    },
    ServiceProfile {
        service: "gmail",
        actions: &[ActionRule {
            action: "send_email",
            triggers: &[
                "envoie un email",
                "envoie un mail",
                "envoie un courriel",
                "écris un email",
                "écris un mail",
            ],
        }],
        keywords: &[
            ("email", 8),
            ("mail", 6),
            ("courriel", 6),
            ("objet", 3),
            ("destinataire", 3),
            ("message", 2),
            ("envoie", 2),
            ("équipe", 1),
        ],
    },
    ServiceProfile {
        service: "hubspot",
        actions: &[
            ActionRule {
                action: "upsert_contact",
                triggers: &[
                    "ajoute le contact",
                    "ajoute un contact",
                    "ajouter le contact",
                    "crée le contact",
                    "crée un contact",
                    "nouveau contact",
                    "mets à jour le contact",
                ],
            },
            ActionRule {
                action: "create_deal",
                triggers: &["crée une transaction", "nouvelle transaction", "nouveau deal"],
            },
            ActionRule {
                action: "create_note",
                triggers: &["ajoute une note", "crée une note"],
            },
        ],
        keywords: &[
            ("hubspot", 8),
            ("crm", 6),
            ("contact", 4),
            ("prospect", 3),
            ("client", 2),
        ],
    },
    ServiceProfile {
        service: "trello",
        actions: &[ActionRule {
            action: "create_card",
            triggers: &[
                "crée une tâche",
                "créer une tâche",
                "ajoute une tâche",
                "nouvelle tâche",
                "crée une carte",
                "ajoute une carte",
            ],
        }],
        keywords: &[
            ("trello", 8),
            ("tâche", 4),
            ("carte", 4),
            ("board", 3),
            ("tableau", 3),
            ("liste", 2),
        ],
    },
    ServiceProfile {
        service: "drive",
        actions: &[ActionRule {
            action: "share_file",
            triggers: &[
                "partage le fichier",
                "partage le document",
                "partager le fichier",
                "donne accès",
            ],
        }],
        keywords: &[
            ("drive", 8),
            ("fichier", 4),
            ("partage", 4),
            ("document", 3),
            ("dossier", 2),
        ],
    },
    ServiceProfile {
        service: "quickbooks",
        actions: &[
            ActionRule {
                action: "financial_report",
                triggers: &["compte de résultat", "rapport financier", "bilan comptable"],
            },
            ActionRule {
                action: "list_invoices",
                triggers: &["liste des factures", "mes factures", "montre les factures"],
            },
            ActionRule {
                action: "list_bills",
                triggers: &["liste des dépenses", "factures fournisseurs", "mes dépenses"],
            },
        ],
        keywords: &[
            ("quickbooks", 8),
            ("facture", 4),
            ("comptabilité", 4),
            ("bilan", 3),
            ("dépense", 3),
            ("finance", 2),
        ],
    },
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleOutcome {
    Clear { service: String, action: Option<String> },
    Ambiguous { candidates: Vec<ServiceCandidate> },
    Inconclusive,
}

/// Stage 1: strong indicators then the weighted keyword table, restricted to
/// the user's enabled services.
pub fn rule_stage(utterance: &str, enabled: &[String]) -> RuleOutcome {
    let normalized = utterance.to_lowercase();
    let mut scored: Vec<(&ServiceProfile, u32, Option<&'static str>)> = Vec::new();

    for profile in PROFILES.iter().filter(|p| enabled.iter().any(|e| e == p.service)) {
        let mut action = None;
        let mut score = 0u32;

        for rule in profile.actions {
            if rule.triggers.iter().any(|trigger| normalized.contains(trigger)) {
                action = Some(rule.action);
                score += STRONG_WEIGHT;
                break;
            }
        }
        // A #channel token is a strong chat indicator on its own.
        if profile.service == "slack"
            && normalized.split_whitespace().any(|token| token.len() > 1 && token.starts_with('#'))
        {
            score += STRONG_WEIGHT;
            action = action.or(Some("post_message"));
        }

        for (keyword, weight) in profile.keywords {
            if normalized.contains(keyword) {
                score += weight;
            }
        }

        if score > 0 {
            scored.push((profile, score, action));
        }
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1));
    let Some(&(top, top_score, top_action)) = scored.first() else {
        return RuleOutcome::Inconclusive;
    };
    let second_score = scored.get(1).map(|entry| entry.1).unwrap_or(0);

    let strong_winner = top_action.is_some() && top_score >= STRONG_WEIGHT;
    let keyword_winner =
        top_score >= CLEAR_THRESHOLD && top_score.saturating_sub(second_score) >= CLEAR_MARGIN;

    if (strong_winner || keyword_winner) && top_score > second_score {
        return RuleOutcome::Clear {
            service: top.service.to_string(),
            action: top_action.map(str::to_string).or_else(|| default_action(top)),
        };
    }

    let candidates: Vec<ServiceCandidate> = scored
        .iter()
        .filter(|entry| entry.1 >= AMBIGUITY_FLOOR)
        .map(|&(profile, _, action)| ServiceCandidate {
            service: profile.service.to_string(),
            action: action.map(str::to_string).or_else(|| default_action(profile)),
        })
        .collect();

    match candidates.len() {
        0 | 1 => RuleOutcome::Inconclusive,
        _ => RuleOutcome::Ambiguous { candidates },
    }
}

fn default_action(profile: &ServiceProfile) -> Option<String> {
    (profile.actions.len() == 1).then(|| profile.actions[0].action.to_string())
}

/// Partial parameter extraction for the detected (service, action) pair:
/// whatever is already present in the utterance pre-fills the slot map.
pub fn extract_parameters(service: &str, action: Option<&str>, utterance: &str) -> SlotValues {
    let mut params = SlotValues::new();
    match (service, action) {
        ("hubspot", Some("upsert_contact")) => {
            if let Some(email) = extract_email(utterance) {
                params.insert("email".to_string(), email);
            }
            if let Some(phone) = extract_phone(utterance) {
                params.insert("phone".to_string(), phone);
            }
            if let Some((first, last)) = extract_contact_name(utterance) {
                params.insert("first_name".to_string(), first);
                if let Some(last) = last {
                    params.insert("last_name".to_string(), last);
                }
            }
        }
        ("slack", Some("post_message")) => {
            if let Some(channel) = extract_channel(utterance) {
                params.insert("channel".to_string(), channel);
            }
            if let Some(message) = extract_quoted(utterance) {
                params.insert("message".to_string(), message);
            }
        }
        ("trello", Some("create_card")) => {
            if let Some(title) = extract_quoted(utterance) {
                params.insert("title".to_string(), title);
            }
            if let Some(due) = extract_due_token(utterance) {
                params.insert("due_date".to_string(), due);
            }
        }
        ("gmail", Some("send_email")) => {
            if let Some(to) = extract_email(utterance) {
                params.insert("to".to_string(), to);
            }
            if let Some(body) = extract_quoted(utterance) {
                params.insert("body".to_string(), body);
            }
        }
        ("drive", Some("share_file")) => {
            if let Some(file_name) = extract_quoted(utterance) {
                params.insert("file_name".to_string(), file_name);
            }
            if let Some(recipient) = extract_email(utterance) {
                params.insert("recipient".to_string(), recipient);
            }
        }
        _ => {}
    }
    params
}

fn extract_email(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|ch: char| !ch.is_ascii_alphanumeric() && ch != '@' && ch != '.' && ch != '-' && ch != '_'))
        .find(|token| {
            let Some((local, domain)) = token.split_once('@') else { return false };
            !local.is_empty() && domain.contains('.')
        })
        .map(str::to_string)
}

fn extract_phone(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|ch: char| !ch.is_ascii_digit() && ch != '+'))
        .find(|token| token.chars().filter(|ch| ch.is_ascii_digit()).count() >= 9)
        .map(str::to_string)
}

fn extract_quoted(text: &str) -> Option<String> {
    for (open, close) in [('«', '»'), ('"', '"'), ('\'', '\'')] {
        let Some(start) = text.find(open) else { continue };
        let rest = &text[start + open.len_utf8()..];
        if let Some(end) = rest.find(close) {
            let inner = rest[..end].trim();
            if !inner.is_empty() {
                return Some(inner.to_string());
            }
        }
    }
    None
}

fn extract_channel(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|token| token.len() > 1 && token.starts_with('#'))
        .map(|token| token.trim_start_matches('#').trim_matches(|ch: char| !ch.is_alphanumeric() && ch != '-' && ch != '_').to_string())
        .filter(|channel| !channel.is_empty())
}

/// The first and (when present) second capitalised words after "contact".
fn extract_contact_name(text: &str) -> Option<(String, Option<String>)> {
    let lowered = text.to_lowercase();
    let position = lowered.find("contact")?;
    // Lowercasing can shift byte offsets for exotic scripts; bail out
    // rather than slicing off a char boundary.
    let after = text.get(position + "contact".len()..)?;
    let mut words = after
        .split_whitespace()
        .take_while(|word| word.chars().all(|ch| ch.is_alphabetic() || ch == '-'));
    let first = words.next()?.to_string();
    let last = words.next().map(str::to_string);
    Some((first, last))
}

fn extract_due_token(text: &str) -> Option<String> {
    let today = Utc::now().date_naive();
    text.to_lowercase()
        .split_whitespace()
        .map(|token| token.trim_matches(|ch: char| !ch.is_alphabetic() && ch != '\''))
        .find(|token| parse_due_date(token, today).is_some())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct LlmIntentPayload {
    intent: String,
    service: Option<String>,
    action: Option<String>,
    #[serde(default)]
    parameters: SlotValues,
}

pub fn build_system_prompt(enabled: &[String]) -> String {
    format!(
        "Tu es le routeur d'intentions d'un assistant personnel. Réponds UNIQUEMENT par un objet JSON \
         de la forme {{\"intent\": \"conversation|general_query|integration|ambiguous|error\", \
         \"service\": \"...\", \"action\": \"...\", \"parameters\": {{}}}}. \
         Le champ service est obligatoire quand intent vaut integration et doit être choisi parmi : [{}]. \
         N'invente jamais un service absent de cette liste.",
        enabled.join(", ")
    )
}

/// Stage 2: decode the model's JSON and filter it against the enabled set.
/// Anything unparseable degrades to a generic conversational reply.
pub fn parse_llm_intent(raw: &str, enabled: &[String]) -> Intent {
    let trimmed = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
    let payload: LlmIntentPayload = match serde_json::from_str(trimmed) {
        Ok(payload) => payload,
        Err(error) => {
            debug!(event_name = "classifier.llm_parse_failed", error = %error, "falling back to conversation");
            return Intent::Conversation { reply: None };
        }
    };

    match payload.intent.as_str() {
        "conversation" => Intent::Conversation { reply: None },
        "general_query" => Intent::GeneralQuery,
        "ambiguous" => Intent::Ambiguous { candidates: Vec::new() },
        "error" => Intent::Error {
            message: "Je n'ai pas compris votre demande, pouvez-vous reformuler ?".to_string(),
        },
        "integration" => {
            let Some(service) = payload.service.map(|s| s.to_lowercase()) else {
                return Intent::GeneralQuery;
            };
            if !enabled.iter().any(|candidate| candidate == &service) {
                warn!(
                    event_name = "classifier.llm_filtered_service",
                    service = %service,
                    "llm proposed a service the user has not enabled"
                );
                return Intent::GeneralQuery;
            }
            Intent::Integration(IntegrationIntent {
                service,
                action: payload.action,
                parameters: payload.parameters,
            })
        }
        _ => Intent::Conversation { reply: None },
    }
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Full pipeline: small talk, rule stage, then the LLM fallback.
    pub async fn classify(
        &self,
        utterance: &str,
        enabled: &[String],
        now: DateTime<Utc>,
    ) -> Intent {
        if let Some(reply) = smalltalk_reply(utterance, now) {
            return Intent::Conversation { reply: Some(reply) };
        }

        match rule_stage(utterance, enabled) {
            RuleOutcome::Clear { service, action } => {
                let parameters = extract_parameters(&service, action.as_deref(), utterance);
                return Intent::Integration(IntegrationIntent { service, action, parameters });
            }
            RuleOutcome::Ambiguous { candidates } => {
                return Intent::Ambiguous { candidates };
            }
            RuleOutcome::Inconclusive => {}
        }

        match self.llm.complete(&build_system_prompt(enabled), utterance).await {
            Ok(raw) => {
                let mut intent = parse_llm_intent(&raw, enabled);
                // Rule-stage extraction still applies to LLM-routed intents:
                // deterministic slots beat model-guessed ones.
                if let Intent::Integration(integration) = &mut intent {
                    let extracted = extract_parameters(
                        &integration.service,
                        integration.action.as_deref(),
                        utterance,
                    );
                    for (key, value) in extracted {
                        integration.parameters.insert(key, value);
                    }
                }
                intent
            }
            Err(error) => {
                warn!(event_name = "classifier.llm_unavailable", error = %error, "llm fallback failed");
                Intent::Conversation { reply: None }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use majordome_core::Intent;

    use super::{
        extract_parameters, parse_llm_intent, rule_stage, IntentClassifier, RuleOutcome,
    };
    use crate::llm::{LlmClient, LlmError};

    struct ScriptedLlm {
        response: Result<String, ()>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            self.response
                .clone()
                .map_err(|_| LlmError::Transport("scripted failure".to_string()))
        }
    }

    fn enabled(services: &[&str]) -> Vec<String> {
        services.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn contact_phrase_routes_to_hubspot_without_llm() {
        let outcome = rule_stage(
            "Ajoute le contact Jean Dupont jean@example.com 0612345678",
            &enabled(&["hubspot", "slack"]),
        );
        assert_eq!(
            outcome,
            RuleOutcome::Clear {
                service: "hubspot".to_string(),
                action: Some("upsert_contact".to_string())
            }
        );
    }

    #[test]
    fn team_message_with_chat_and_mail_is_ambiguous() {
        let outcome =
            rule_stage("envoie un message à l'équipe", &enabled(&["slack", "gmail"]));
        let RuleOutcome::Ambiguous { candidates } = outcome else {
            panic!("expected ambiguity, got {outcome:?}");
        };
        let services: Vec<&str> = candidates.iter().map(|c| c.service.as_str()).collect();
        assert!(services.contains(&"slack"));
        assert!(services.contains(&"gmail"));
    }

    #[test]
    fn hash_channel_marker_is_a_strong_slack_indicator() {
        let outcome = rule_stage("envoie 'hello' sur #secret", &enabled(&["slack", "gmail"]));
        assert_eq!(
            outcome,
            RuleOutcome::Clear {
                service: "slack".to_string(),
                action: Some("post_message".to_string())
            }
        );
    }

    #[test]
    fn disabled_services_never_score() {
        let outcome = rule_stage("envoie un email à jean@example.com", &enabled(&["slack"]));
        assert!(!matches!(outcome, RuleOutcome::Clear { ref service, .. } if service == "gmail"));
    }

    #[test]
    fn contact_parameters_are_extracted_from_the_utterance() {
        let params = extract_parameters(
            "hubspot",
            Some("upsert_contact"),
            "Ajoute le contact Jean Dupont jean@example.com 0612345678",
        );
        assert_eq!(params.get("email").map(String::as_str), Some("jean@example.com"));
        assert_eq!(params.get("phone").map(String::as_str), Some("0612345678"));
        assert_eq!(params.get("first_name").map(String::as_str), Some("Jean"));
        assert_eq!(params.get("last_name").map(String::as_str), Some("Dupont"));
    }

    #[test]
    fn slack_parameters_capture_channel_and_quoted_message() {
        let params =
            extract_parameters("slack", Some("post_message"), "envoie 'hello' sur #secret");
        assert_eq!(params.get("channel").map(String::as_str), Some("secret"));
        assert_eq!(params.get("message").map(String::as_str), Some("hello"));
    }

    #[test]
    fn trello_parameters_capture_quoted_title_and_due_token() {
        let params = extract_parameters(
            "trello",
            Some("create_card"),
            "Crée une tâche 'Préparer démo' pour demain",
        );
        assert_eq!(params.get("title").map(String::as_str), Some("Préparer démo"));
        assert_eq!(params.get("due_date").map(String::as_str), Some("demain"));
    }

    #[test]
    fn llm_payload_is_filtered_against_enabled_services() {
        let intent = parse_llm_intent(
            r#"{"intent": "integration", "service": "notion", "action": "create_page"}"#,
            &enabled(&["slack", "gmail"]),
        );
        assert_eq!(intent, Intent::GeneralQuery);

        let intent = parse_llm_intent(
            r#"{"intent": "integration", "service": "Gmail", "action": "send_email"}"#,
            &enabled(&["slack", "gmail"]),
        );
        let Intent::Integration(integration) = intent else {
            panic!("expected integration intent");
        };
        assert_eq!(integration.service, "gmail");
    }

    #[test]
    fn malformed_llm_output_degrades_to_conversation() {
        let intent = parse_llm_intent("the user wants to send an email", &enabled(&["gmail"]));
        assert_eq!(intent, Intent::Conversation { reply: None });
    }

    #[tokio::test]
    async fn greetings_short_circuit_before_any_stage() {
        let classifier = IntentClassifier::new(Arc::new(ScriptedLlm { response: Err(()) }));
        let intent = classifier.classify("Bonjour", &enabled(&["slack"]), Utc::now()).await;
        let Intent::Conversation { reply: Some(reply) } = intent else {
            panic!("expected canned conversation reply");
        };
        assert!(reply.contains("Bonjour"));
    }

    #[tokio::test]
    async fn llm_transport_failure_degrades_to_conversation() {
        let classifier = IntentClassifier::new(Arc::new(ScriptedLlm { response: Err(()) }));
        let intent = classifier
            .classify("peux-tu m'aider avec un truc ?", &enabled(&["slack"]), Utc::now())
            .await;
        assert_eq!(intent, Intent::Conversation { reply: None });
    }

    #[tokio::test]
    async fn llm_routed_intent_gains_deterministic_parameters() {
        let classifier = IntentClassifier::new(Arc::new(ScriptedLlm {
            response: Ok(
                r#"{"intent": "integration", "service": "gmail", "action": "send_email"}"#
                    .to_string(),
            ),
        }));
        let intent = classifier
            .classify(
                "peux-tu prévenir marie@example.com de mon retard ?",
                &enabled(&["gmail"]),
                Utc::now(),
            )
            .await;
        let Intent::Integration(integration) = intent else {
            panic!("expected integration intent");
        };
        assert_eq!(integration.parameters.get("to").map(String::as_str), Some("marie@example.com"));
    }
}
