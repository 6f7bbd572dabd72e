//! The orchestrator: validates an inbound utterance, routes it through the
//! pending dialogue or the intent classifier, executes adapter actions with
//! credentials and retries, and persists exactly one assistant reply per
//! processed utterance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use majordome_core::dialogue::{
    self, is_cancellation, Dialogue, DialogueAction, DialogueContext, DialogueEvent,
    DialogueState,
};
use majordome_core::domain::intent::{SlotDescriptor, SlotKind};
use majordome_core::errors::ErrorKind;
use majordome_core::{
    ActionDescriptor, Conversation, Intent, IntegrationIntent, Message, MessageRole,
    RetryDecision, RetryPolicy, UserIntegration,
};
use majordome_db::repositories::{
    ConversationRepository, RepositoryError, UserIntegrationRepository,
};
use majordome_integrations::adapter::ActionOutcome;
use majordome_integrations::{
    ActionCall, AdapterError, CredentialStore, IntegrationRegistry, ServiceAdapter,
};

use crate::classifier::IntentClassifier;
use crate::llm::LlmClient;
use crate::replies;
use crate::session::{Session, SessionStore};

/// Oversize messages are truncated here, not rejected.
pub const MAX_MESSAGE_CHARS: usize = 4000;

const GENERAL_SYSTEM_PROMPT: &str = "Tu es un assistant personnel francophone. \
     Réponds brièvement, en une ou deux phrases utiles.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatReply {
    pub conversation_id: String,
    pub reply: String,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("le message est vide")]
    EmptyMessage,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct Orchestrator {
    registry: Arc<IntegrationRegistry>,
    credentials: Arc<CredentialStore>,
    conversations: Arc<dyn ConversationRepository>,
    user_integrations: Arc<dyn UserIntegrationRepository>,
    llm: Arc<dyn LlmClient>,
    classifier: IntentClassifier,
    sessions: SessionStore,
    retry: RetryPolicy,
    conversation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<IntegrationRegistry>,
        credentials: Arc<CredentialStore>,
        conversations: Arc<dyn ConversationRepository>,
        user_integrations: Arc<dyn UserIntegrationRepository>,
        llm: Arc<dyn LlmClient>,
        sessions: SessionStore,
    ) -> Self {
        Self {
            registry,
            credentials,
            conversations,
            user_integrations,
            classifier: IntentClassifier::new(llm.clone()),
            llm,
            sessions,
            retry: RetryPolicy::default(),
            conversation_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Entry point. Per (user, conversation) the processing is serialized:
    /// messages queue on the conversation lock and are handled in order of
    /// receipt.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatReply, OrchestratorError> {
        let text =
            normalize_message(&request.message).ok_or(OrchestratorError::EmptyMessage)?;

        let conversation = self
            .resolve_conversation(&request.user_id, request.conversation_id.as_deref())
            .await?;
        let lock = self.conversation_lock(&conversation.id.0).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut session = self.sessions.load_or_create(&request.user_id, now).await;

        self.conversations
            .append_message(&Message::new(
                conversation.id.clone(),
                MessageRole::User,
                &text,
                now,
            ))
            .await?;

        let reply = self.reply_for(&mut session, &request.user_id, &text, now).await?;

        let limit = self.sessions.history_limit();
        session.push_history(MessageRole::User, &text, now, limit);
        session.push_history(MessageRole::Assistant, &reply, now, limit);
        session.last_activity = now;
        self.sessions.persist(session).await;

        self.conversations
            .append_message(&Message::new(
                conversation.id.clone(),
                MessageRole::Assistant,
                &reply,
                Utc::now(),
            ))
            .await?;

        info!(
            event_name = "orchestrator.reply_sent",
            correlation_id = %request.correlation_id,
            user_id = %request.user_id,
            conversation_id = %conversation.id,
            "assistant reply persisted"
        );

        Ok(ChatReply { conversation_id: conversation.id.0, reply })
    }

    async fn resolve_conversation(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Conversation, RepositoryError> {
        if let Some(raw_id) = conversation_id {
            let id = majordome_core::ConversationId(raw_id.to_string());
            if let Some(conversation) = self.conversations.find(&id).await? {
                if conversation.user_id == user_id {
                    if !conversation.active {
                        self.conversations.activate(user_id, &id).await?;
                    }
                    return Ok(Conversation { active: true, ..conversation });
                }
            }
        }
        if let Some(active) = self.conversations.find_active(user_id).await? {
            return Ok(active);
        }
        self.conversations.create(user_id, Utc::now()).await
    }

    async fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.conversation_locks.lock().await;
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn reply_for(
        &self,
        session: &mut Session,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<String, OrchestratorError> {
        // A pending dialogue swallows the utterance before classification;
        // this also lets the user retry a stalled commit by repeating.
        if session.has_active_dialogue() {
            return self.advance_dialogue(session, user_id, text).await;
        }

        if session.last_user_message() == Some(text) {
            return Ok(replies::duplicate_reply());
        }

        let enabled: Vec<String> = self
            .user_integrations
            .list_enabled_for_user(user_id)
            .await?
            .into_iter()
            .map(|record| record.service)
            .collect();

        let intent = self.classifier.classify(text, &enabled, now).await;
        info!(
            event_name = "orchestrator.intent_classified",
            user_id = %user_id,
            intent_kind = intent.kind(),
            "utterance classified"
        );

        match intent {
            Intent::Conversation { reply: Some(reply) } => Ok(reply),
            Intent::Conversation { reply: None } => Ok(replies::general_reply()),
            Intent::GeneralQuery => Ok(self.answer_general_query(text).await),
            Intent::Ambiguous { candidates } => Ok(replies::choose_service_reply(&candidates)),
            Intent::Error { message } => {
                session.error_count += 1;
                Ok(message)
            }
            Intent::Integration(integration) => {
                self.start_integration(session, user_id, integration).await
            }
        }
    }

    async fn answer_general_query(&self, text: &str) -> String {
        match self.llm.complete(GENERAL_SYSTEM_PROMPT, text).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            _ => replies::general_reply(),
        }
    }

    async fn start_integration(
        &self,
        session: &mut Session,
        user_id: &str,
        intent: IntegrationIntent,
    ) -> Result<String, OrchestratorError> {
        let Some(adapter) = self.registry.lookup(&intent.service) else {
            return Ok(replies::not_connected_reply(&intent.service));
        };
        let service = adapter.name().to_string();

        let action_name = match intent.action.or_else(|| single_action(adapter.as_ref())) {
            Some(action) => action,
            None => return Ok(replies::unknown_action_reply(&service)),
        };
        let Some(descriptor) = adapter.action(&action_name) else {
            warn!(
                event_name = "orchestrator.unknown_action",
                service = %service,
                action = %action_name,
                "classified action is not declared by the adapter"
            );
            return Ok(replies::unknown_action_reply(&service));
        };

        let mut dialogue = Dialogue::new(service, action_name);
        for (slot_name, raw_value) in intent.parameters {
            if let Some(slot) = descriptor.slot(&slot_name) {
                if let Ok(value) = parse_slot_value(slot, &raw_value) {
                    dialogue.slots.insert(slot_name, value);
                }
            }
        }

        self.drive(session, user_id, dialogue, descriptor, DialogueEvent::ActionSelected).await
    }

    async fn advance_dialogue(
        &self,
        session: &mut Session,
        user_id: &str,
        text: &str,
    ) -> Result<String, OrchestratorError> {
        let Some(mut dialogue) = session.dialogue.take() else {
            return Ok(replies::general_reply());
        };

        if is_cancellation(text) {
            return Ok(replies::cancel_reply());
        }

        let Some(adapter) = self.registry.lookup(&dialogue.service) else {
            return Ok(replies::not_connected_reply(&dialogue.service));
        };
        let Some(descriptor) = adapter.action(&dialogue.action) else {
            return Ok(replies::unknown_action_reply(&dialogue.service));
        };

        let event = match dialogue.state.clone() {
            DialogueState::Collecting { slot } => {
                let Some(slot_descriptor) = descriptor.slot(&slot) else {
                    return Ok(replies::error_reply(
                        ErrorKind::Internal,
                        &dialogue.service,
                        "slot inconnu",
                    ));
                };
                match parse_slot_value(slot_descriptor, text) {
                    Ok(value) => {
                        dialogue.slots.insert(slot.clone(), value);
                        DialogueEvent::SlotFilled { slot }
                    }
                    Err(detail) => {
                        let reply =
                            replies::slot_validation_reply(&detail, slot_descriptor.prompt);
                        session.dialogue = Some(dialogue);
                        return Ok(reply);
                    }
                }
            }
            DialogueState::Confirming => {
                if is_affirmative(text) {
                    DialogueEvent::Confirmed
                } else if is_negative(text) {
                    DialogueEvent::ConfirmationDeclined
                } else {
                    let prompt = replies::confirmation_prompt(action_label(descriptor));
                    session.dialogue = Some(dialogue);
                    return Ok(prompt);
                }
            }
            // A commit stalled on transient errors; any new utterance is a
            // retry request.
            DialogueState::Committing => {
                return self.commit(session, user_id, dialogue).await;
            }
            DialogueState::Idle | DialogueState::Done => {
                return Ok(replies::general_reply());
            }
        };

        self.drive(session, user_id, dialogue, descriptor, event).await
    }

    async fn drive(
        &self,
        session: &mut Session,
        user_id: &str,
        mut dialogue: Dialogue,
        descriptor: &ActionDescriptor,
        event: DialogueEvent,
    ) -> Result<String, OrchestratorError> {
        let context = DialogueContext {
            missing_required_slots: descriptor
                .missing_required(&dialogue.slots)
                .iter()
                .map(|slot| slot.to_string())
                .collect(),
            requires_confirmation: descriptor.requires_confirmation,
        };

        let outcome = match dialogue::transition(&dialogue.state, &event, &context) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "orchestrator.dialogue_transition_rejected",
                    service = %dialogue.service,
                    error = %error,
                    "dialogue state machine rejected the event"
                );
                session.dialogue = None;
                return Ok(replies::error_reply(
                    ErrorKind::Internal,
                    &dialogue.service,
                    &error.to_string(),
                ));
            }
        };
        dialogue.state = outcome.to;

        match outcome.actions.first().cloned() {
            Some(DialogueAction::PromptSlot { slot }) => {
                let prompt = descriptor
                    .slot(&slot)
                    .map(|descriptor| descriptor.prompt.to_string())
                    .unwrap_or_else(|| "Pouvez-vous préciser ?".to_string());
                session.dialogue = Some(dialogue);
                Ok(prompt)
            }
            Some(DialogueAction::PromptConfirmation) => {
                let prompt = replies::confirmation_prompt(action_label(descriptor));
                session.dialogue = Some(dialogue);
                Ok(prompt)
            }
            Some(DialogueAction::InvokeAdapter) => {
                self.commit(session, user_id, dialogue).await
            }
            Some(DialogueAction::ClearSlots) => Ok(replies::cancel_reply()),
            _ => {
                session.dialogue = Some(dialogue);
                Ok(replies::general_reply())
            }
        }
    }

    /// Execute the collected action with the retry budget. Transient
    /// failures leave the dialogue in `Committing` so repeating retries;
    /// fatal failures reset it.
    async fn commit(
        &self,
        session: &mut Session,
        user_id: &str,
        mut dialogue: Dialogue,
    ) -> Result<String, OrchestratorError> {
        dialogue.state = DialogueState::Committing;
        let service = dialogue.service.clone();

        let Some(record) = self.user_integrations.find(user_id, &service).await? else {
            return Ok(replies::not_connected_reply(&service));
        };

        let mut attempt = 0u32;
        let result = loop {
            match self.execute_once(user_id, &service, &dialogue, &record).await {
                Ok(outcome) => break Ok(outcome),
                Err(error) => {
                    dialogue.commit_attempts += 1;
                    match self.retry.decide(error.kind, attempt) {
                        RetryDecision::RetryAfter(delay) => {
                            warn!(
                                event_name = "orchestrator.commit_retry_scheduled",
                                service = %service,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "transient failure, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        RetryDecision::GiveUp => break Err(error),
                    }
                }
            }
        };

        match result {
            Ok(outcome) => {
                dialogue.state = DialogueState::Done;
                session.dialogue = Some(dialogue);
                Ok(outcome.reply)
            }
            Err(error) if error.kind == ErrorKind::Transport => {
                session.error_count += 1;
                session.dialogue = Some(dialogue);
                Ok(replies::error_reply(ErrorKind::Transport, &service, &error.message))
            }
            Err(error) => {
                session.error_count += 1;
                session.dialogue = None;
                warn!(
                    event_name = "orchestrator.commit_failed",
                    service = %service,
                    kind = error.kind.as_str(),
                    error = %error,
                    "adapter action failed"
                );
                Ok(replies::error_reply(error.kind, &service, &error.message))
            }
        }
    }

    async fn execute_once(
        &self,
        user_id: &str,
        service: &str,
        dialogue: &Dialogue,
        record: &UserIntegration,
    ) -> Result<ActionOutcome, AdapterError> {
        let adapter = self.registry.lookup(service).ok_or_else(|| {
            AdapterError::internal(format!("aucun adaptateur enregistré pour {service}"))
        })?;
        let token = self.credentials.get_valid_token(user_id, service).await?;
        adapter
            .execute(ActionCall {
                action: &dialogue.action,
                params: &dialogue.slots,
                token: &token,
                config: &record.config,
                scratch: &record.scratch,
            })
            .await
    }
}

/// Collapse whitespace runs, trim, truncate to the size limit. Returns
/// `None` for an effectively empty message.
fn normalize_message(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_MESSAGE_CHARS).collect())
}

fn single_action(adapter: &dyn ServiceAdapter) -> Option<String> {
    let actions = adapter.actions();
    (actions.len() == 1).then(|| actions[0].name.to_string())
}

fn parse_slot_value(slot: &SlotDescriptor, raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("Je n'ai pas compris.".to_string());
    }
    match slot.kind {
        SlotKind::Text => Ok(value.to_string()),
        SlotKind::Email => {
            let valid = value
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
            if valid {
                Ok(value.to_string())
            } else {
                Err(format!("« {value} » ne ressemble pas à une adresse email valide."))
            }
        }
        SlotKind::DueDate => {
            if majordome_core::dates::parse_due_date(value, Utc::now().date_naive()).is_some() {
                Ok(value.to_string())
            } else {
                Err("Je ne comprends que « aujourd'hui », « demain » ou un jour de la semaine."
                    .to_string())
            }
        }
    }
}

fn is_affirmative(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "oui" | "yes" | "ok" | "d'accord" | "confirme" | "vas-y" | "go"
    )
}

fn is_negative(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "non" | "no")
}

fn action_label(descriptor: &ActionDescriptor) -> &'static str {
    match descriptor.name {
        "upsert_contact" => "enregistrer ce contact",
        "send_email" => "envoyer cet email",
        "post_message" => "publier ce message",
        "create_card" => "créer cette tâche",
        "share_file" => "partager ce fichier",
        _ => "exécuter cette action",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::json;

    use majordome_core::config::{OAuthConfig, SessionConfig};
    use majordome_core::domain::intent::{ActionDescriptor, SlotDescriptor, SlotKind};
    use majordome_core::schema::ConfigSchema;
    use majordome_core::{MessageRole, RetryPolicy, SlotValues, TokenSet, UserIntegration};
    use majordome_db::repositories::{
        InMemoryConversationRepository, InMemoryUserIntegrationRepository,
    };
    use majordome_integrations::adapter::{
        ActionCall, ActionOutcome, AdapterError, RefreshGrant, ServiceAdapter,
    };
    use majordome_integrations::{CredentialStore, IntegrationRegistry};

    use super::{ChatRequest, Orchestrator, OrchestratorError};
    use crate::llm::{LlmClient, LlmError};
    use crate::session::{InMemorySessionCache, SessionStore};

    const HUBSPOT_ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
        name: "upsert_contact",
        slots: &[SlotDescriptor {
            name: "email",
            prompt: "Quelle est l'adresse email du contact ?",
            kind: SlotKind::Email,
            required: true,
        }],
        requires_confirmation: false,
    }];

    const TRELLO_ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
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
                prompt: "À qui dois-je assigner la tâche ?",
                kind: SlotKind::Text,
                required: true,
            },
        ],
        requires_confirmation: false,
    }];

    const SLACK_ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
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

    const GMAIL_ACTIONS: &[ActionDescriptor] = &[ActionDescriptor {
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

    struct ScriptedAdapter {
        service: &'static str,
        actions: &'static [ActionDescriptor],
        execute_calls: AtomicUsize,
        last_params: std::sync::Mutex<Option<SlotValues>>,
        script: std::sync::Mutex<VecDeque<Result<ActionOutcome, AdapterError>>>,
        fallback: Result<ActionOutcome, AdapterError>,
    }

    impl ScriptedAdapter {
        fn new(
            service: &'static str,
            actions: &'static [ActionDescriptor],
            fallback: Result<ActionOutcome, AdapterError>,
        ) -> Self {
            Self {
                service,
                actions,
                execute_calls: AtomicUsize::new(0),
                last_params: std::sync::Mutex::new(None),
                script: std::sync::Mutex::new(VecDeque::new()),
                fallback,
            }
        }

        fn calls(&self) -> usize {
            self.execute_calls.load(Ordering::SeqCst)
        }

        fn last_params(&self) -> Option<SlotValues> {
            self.last_params.lock().expect("params lock").clone()
        }
    }

    #[async_trait]
    impl ServiceAdapter for ScriptedAdapter {
        fn name(&self) -> &'static str {
            self.service
        }

        fn schema(&self) -> &ConfigSchema {
            &ConfigSchema::EMPTY
        }

        fn actions(&self) -> &'static [ActionDescriptor] {
            self.actions
        }

        async fn refresh(&self, _grant: RefreshGrant<'_>) -> Result<TokenSet, AdapterError> {
            Err(AdapterError::internal("refresh not scripted"))
        }

        async fn verify(&self, _token: &str) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn execute(&self, call: ActionCall<'_>) -> Result<ActionOutcome, AdapterError> {
            self.execute_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_params.lock().expect("params lock") = Some(call.params.clone());
            let scripted = self.script.lock().expect("script lock").pop_front();
            scripted.unwrap_or_else(|| self.fallback.clone())
        }
    }

    struct UnreachableLlm;

    #[async_trait]
    impl LlmClient for UnreachableLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Err(LlmError::Transport("llm disabled in tests".to_string()))
        }
    }

    fn connected_record(service: &str) -> UserIntegration {
        let now = Utc::now();
        let mut record = UserIntegration::new("u-1", service, now);
        record.enabled = true;
        record.access_token = Some("valid-token".to_string());
        record.token_expires_at = Some(now + Duration::hours(6));
        record.scratch.insert("board_id".to_string(), json!("b-42"));
        record
    }

    struct Harness {
        orchestrator: Orchestrator,
        conversations: Arc<InMemoryConversationRepository>,
    }

    fn harness(adapters: Vec<Arc<ScriptedAdapter>>, retry: Option<RetryPolicy>) -> Harness {
        let mut registry = IntegrationRegistry::new();
        let mut records = Vec::new();
        for adapter in &adapters {
            records.push(connected_record(adapter.service));
            registry.register(adapter.clone());
        }
        let registry = Arc::new(registry);
        let user_integrations =
            Arc::new(InMemoryUserIntegrationRepository::with_records(records));
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let credentials = Arc::new(CredentialStore::new(
            user_integrations.clone(),
            registry.clone(),
            OAuthConfig::default(),
        ));
        let sessions = SessionStore::new(
            Arc::new(InMemorySessionCache::new()),
            &SessionConfig { idle_timeout_secs: 3600, history_limit: 20, cache_url: None },
        );
        let mut orchestrator = Orchestrator::new(
            registry,
            credentials,
            conversations.clone(),
            user_integrations,
            Arc::new(UnreachableLlm),
            sessions,
        );
        if let Some(retry) = retry {
            orchestrator = orchestrator.with_retry_policy(retry);
        }
        Harness { orchestrator, conversations }
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            user_id: "u-1".to_string(),
            conversation_id: None,
            message: message.to_string(),
            correlation_id: "test".to_string(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            base: StdDuration::from_millis(1),
            cap: StdDuration::from_millis(2),
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn greeting_gets_a_canned_reply_without_any_adapter_call() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "hubspot",
            HUBSPOT_ACTIONS,
            Ok(ActionOutcome::new("ok", json!({}))),
        ));
        let harness = harness(vec![adapter.clone()], None);

        let reply = harness.orchestrator.handle(request("Bonjour")).await.expect("reply");
        assert!(reply.reply.contains("Bonjour"));
        assert_eq!(adapter.calls(), 0);

        let messages = harness.conversations.all_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn ambiguous_team_message_asks_the_user_to_choose() {
        let slack = Arc::new(ScriptedAdapter::new(
            "slack",
            SLACK_ACTIONS,
            Ok(ActionOutcome::new("posté", json!({}))),
        ));
        let gmail = Arc::new(ScriptedAdapter::new(
            "gmail",
            &[],
            Ok(ActionOutcome::new("envoyé", json!({}))),
        ));
        let harness = harness(vec![slack.clone(), gmail.clone()], None);

        let reply = harness
            .orchestrator
            .handle(request("envoie un message à l'équipe"))
            .await
            .expect("reply");

        assert!(reply.reply.contains("Slack"), "{}", reply.reply);
        assert!(reply.reply.contains("Gmail"), "{}", reply.reply);
        assert_eq!(slack.calls() + gmail.calls(), 0);
    }

    #[tokio::test]
    async fn one_shot_contact_upsert_executes_a_single_adapter_call() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "hubspot",
            HUBSPOT_ACTIONS,
            Ok(ActionOutcome::new(
                "Le contact Jean Dupont a été créé dans HubSpot.",
                json!({ "outcome": "created" }),
            )),
        ));
        let harness = harness(vec![adapter.clone()], None);

        let reply = harness
            .orchestrator
            .handle(request("Ajoute le contact Jean Dupont jean@example.com 0612345678"))
            .await
            .expect("reply");

        assert_eq!(reply.reply, "Le contact Jean Dupont a été créé dans HubSpot.");
        assert_eq!(adapter.calls(), 1);
        let params = adapter.last_params().expect("params captured");
        assert_eq!(params.get("email").map(String::as_str), Some("jean@example.com"));
    }

    #[tokio::test]
    async fn card_creation_collects_missing_slots_turn_by_turn() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "trello",
            TRELLO_ACTIONS,
            Ok(ActionOutcome::new(
                "La tâche « Préparer démo » a été créée dans la liste En cours.",
                json!({}),
            )),
        ));
        let harness = harness(vec![adapter.clone()], None);

        let first = harness
            .orchestrator
            .handle(request("Crée une tâche 'Préparer démo' sur le board"))
            .await
            .expect("first turn");
        assert!(first.reply.contains("quelle liste"), "{}", first.reply);
        assert_eq!(adapter.calls(), 0);

        let second = harness.orchestrator.handle(request("En cours")).await.expect("second turn");
        assert!(second.reply.contains("assigner"), "{}", second.reply);
        assert_eq!(adapter.calls(), 0);

        let third = harness.orchestrator.handle(request("Marie")).await.expect("third turn");
        assert!(third.reply.contains("Préparer démo"), "{}", third.reply);
        assert_eq!(adapter.calls(), 1);

        let params = adapter.last_params().expect("params captured");
        assert_eq!(params.get("title").map(String::as_str), Some("Préparer démo"));
        assert_eq!(params.get("list_name").map(String::as_str), Some("En cours"));
        assert_eq!(params.get("member").map(String::as_str), Some("Marie"));

        // Three utterances, three assistant replies, strictly alternating.
        let messages = harness.conversations.all_messages();
        assert_eq!(messages.len(), 6);
        for pair in messages.chunks(2) {
            assert_eq!(pair[0].role, MessageRole::User);
            assert_eq!(pair[1].role, MessageRole::Assistant);
        }
    }

    #[tokio::test]
    async fn unjoined_channel_error_is_surfaced_without_retry() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "slack",
            SLACK_ACTIONS,
            Err(AdapterError::permission(
                "Je ne suis pas membre du canal #secret : invitez le robot puis réessayez.",
            )),
        ));
        let harness = harness(vec![adapter.clone()], Some(fast_retry()));

        let reply = harness
            .orchestrator
            .handle(request("envoie 'hello' sur #secret"))
            .await
            .expect("reply");

        assert!(reply.reply.contains("#secret"), "{}", reply.reply);
        assert!(reply.reply.contains("invitez"), "{}", reply.reply);
        assert_eq!(adapter.calls(), 1, "permission errors must not be retried");
    }

    #[tokio::test]
    async fn transient_failures_respect_the_retry_budget() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "slack",
            SLACK_ACTIONS,
            Err(AdapterError::transport("le service slack ne répond pas")),
        ));
        let harness = harness(vec![adapter.clone()], Some(fast_retry()));

        let reply = harness
            .orchestrator
            .handle(request("envoie 'hello' sur #general"))
            .await
            .expect("reply");

        // max_attempts retries plus the initial call.
        assert_eq!(adapter.calls(), 4);
        assert!(reply.reply.contains("réessayez"), "{}", reply.reply);

        // The dialogue stalled in committing: repeating the message retries
        // the commit instead of reclassifying.
        adapter.script.lock().expect("script lock").push_back(Ok(ActionOutcome::new(
            "Message publié dans #general.",
            json!({}),
        )));
        let retried = harness
            .orchestrator
            .handle(request("envoie 'hello' sur #general"))
            .await
            .expect("retry");
        assert_eq!(retried.reply, "Message publié dans #general.");
        assert_eq!(adapter.calls(), 5);
    }

    #[tokio::test]
    async fn destructive_actions_wait_for_an_explicit_confirmation() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "gmail",
            GMAIL_ACTIONS,
            Ok(ActionOutcome::new(
                "Email « Point projet » envoyé à jean@example.com.",
                json!({}),
            )),
        ));
        let harness = harness(vec![adapter.clone()], None);

        let first = harness
            .orchestrator
            .handle(request("envoie un email à jean@example.com"))
            .await
            .expect("first turn");
        assert!(first.reply.contains("objet"), "{}", first.reply);

        let second =
            harness.orchestrator.handle(request("Point projet")).await.expect("second turn");
        assert!(second.reply.contains("contenu"), "{}", second.reply);

        let third = harness
            .orchestrator
            .handle(request("On se retrouve à 15h au bureau."))
            .await
            .expect("third turn");
        assert!(third.reply.contains("(oui/non)"), "{}", third.reply);
        assert_eq!(adapter.calls(), 0, "nothing executes before confirmation");

        let fourth = harness.orchestrator.handle(request("oui")).await.expect("fourth turn");
        assert!(fourth.reply.contains("envoyé"), "{}", fourth.reply);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn declined_confirmation_cancels_without_executing() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "gmail",
            GMAIL_ACTIONS,
            Ok(ActionOutcome::new("envoyé", json!({}))),
        ));
        let harness = harness(vec![adapter.clone()], None);

        harness
            .orchestrator
            .handle(request("envoie un email à jean@example.com"))
            .await
            .expect("start");
        harness.orchestrator.handle(request("Point projet")).await.expect("subject");
        harness.orchestrator.handle(request("Corps du message.")).await.expect("body");
        let declined = harness.orchestrator.handle(request("non")).await.expect("decline");

        assert!(declined.reply.contains("annule"), "{}", declined.reply);
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_echo_is_detected_outside_dialogues() {
        let harness = harness(vec![], None);

        let first = harness
            .orchestrator
            .handle(request("peux-tu m'aider ?"))
            .await
            .expect("first");
        let second = harness
            .orchestrator
            .handle(request("peux-tu m'aider ?"))
            .await
            .expect("second");

        assert_ne!(first.reply, second.reply);
        assert!(second.reply.contains("même message"), "{}", second.reply);
    }

    #[tokio::test]
    async fn empty_messages_are_rejected() {
        let harness = harness(vec![], None);
        let result = harness.orchestrator.handle(request("   \n\t  ")).await;
        assert!(matches!(result, Err(OrchestratorError::EmptyMessage)));
    }

    #[tokio::test]
    async fn oversize_messages_are_truncated_and_processed() {
        let harness = harness(vec![], None);
        let long_message = "a".repeat(5000);

        harness.orchestrator.handle(request(&long_message)).await.expect("reply");

        let messages = harness.conversations.all_messages();
        assert_eq!(messages[0].content.chars().count(), super::MAX_MESSAGE_CHARS);
    }

    #[tokio::test]
    async fn cancellation_resets_the_dialogue() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "trello",
            TRELLO_ACTIONS,
            Ok(ActionOutcome::new("créée", json!({}))),
        ));
        let harness = harness(vec![adapter.clone()], None);

        harness
            .orchestrator
            .handle(request("Crée une tâche 'Préparer démo' sur le board"))
            .await
            .expect("start dialogue");
        let cancelled = harness.orchestrator.handle(request("annule")).await.expect("cancel");
        assert!(cancelled.reply.contains("annule"), "{}", cancelled.reply);

        // The next utterance classifies from scratch.
        let greeting = harness.orchestrator.handle(request("Bonjour")).await.expect("greeting");
        assert!(greeting.reply.contains("Bonjour"));
        assert_eq!(adapter.calls(), 0);
    }

    #[tokio::test]
    async fn every_utterance_appends_exactly_one_assistant_message() {
        let harness = harness(vec![], None);
        for message in ["Bonjour", "merci", "au revoir"] {
            harness.orchestrator.handle(request(message)).await.expect("reply");
        }

        let messages = harness.conversations.all_messages();
        assert_eq!(messages.len(), 6);
        let assistant_count =
            messages.iter().filter(|m| m.role == MessageRole::Assistant).count();
        assert_eq!(assistant_count, 3);
    }
}
