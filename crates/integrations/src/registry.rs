use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::{AdapterError, ServiceAdapter};
use crate::adapters::{
    drive::DriveAdapter, gmail::GmailAdapter, hubspot::HubspotAdapter,
    quickbooks::QuickbooksAdapter, slack::SlackAdapter, trello::TrelloAdapter,
};

/// Friendly spellings mapped to canonical service names. Lookup itself is
/// case-insensitive; this table only covers renames, not casing.
const ALIASES: &[(&str, &str)] = &[
    ("google drive", "drive"),
    ("gdrive", "drive"),
    ("google mail", "gmail"),
    ("mail", "gmail"),
    ("crm", "hubspot"),
    ("qb", "quickbooks"),
];

/// Startup-registered table mapping canonical service names to adapters.
/// `lookup` returns `None` for unknown names; it never fails loudly.
#[derive(Default)]
pub struct IntegrationRegistry {
    adapters: HashMap<String, Arc<dyn ServiceAdapter>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn canonical_name(&self, name: &str) -> Option<String> {
        let normalized = name.trim().to_lowercase();
        let resolved = ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, canonical)| (*canonical).to_string())
            .unwrap_or(normalized);
        self.adapters.contains_key(&resolved).then_some(resolved)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ServiceAdapter>> {
        let canonical = self.canonical_name(name)?;
        self.adapters.get(&canonical).cloned()
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Gate for the enablement invariant: an enabled record must satisfy its
    /// adapter's config schema. Callers persisting user integrations reject
    /// the write when this fails.
    pub fn validate_enablement(
        &self,
        record: &majordome_core::UserIntegration,
    ) -> Result<(), AdapterError> {
        if !record.enabled {
            return Ok(());
        }
        let adapter = self.lookup(&record.service).ok_or_else(|| {
            AdapterError::schema(format!("service inconnu : {}", record.service))
        })?;
        adapter.validate_config(&record.config)
    }
}

/// The production registry: every compiled-in adapter on the shared client.
pub fn default_registry(client: &reqwest::Client) -> IntegrationRegistry {
    let mut registry = IntegrationRegistry::new();
    registry.register(Arc::new(HubspotAdapter::new(client.clone())));
    registry.register(Arc::new(SlackAdapter::new(client.clone())));
    registry.register(Arc::new(TrelloAdapter::new(client.clone())));
    registry.register(Arc::new(GmailAdapter::new(client.clone())));
    registry.register(Arc::new(DriveAdapter::new(client.clone())));
    registry.register(Arc::new(QuickbooksAdapter::new(client.clone())));
    registry
}

#[cfg(test)]
mod tests {
    use super::default_registry;

    #[test]
    fn registers_every_compiled_adapter() {
        let registry = default_registry(&reqwest::Client::new());
        assert_eq!(
            registry.service_names(),
            vec!["drive", "gmail", "hubspot", "quickbooks", "slack", "trello"]
        );
    }

    #[test]
    fn lookup_is_case_insensitive_and_alias_aware() {
        let registry = default_registry(&reqwest::Client::new());

        assert!(registry.lookup("HubSpot").is_some());
        assert_eq!(registry.canonical_name("Google Drive").as_deref(), Some("drive"));
        assert_eq!(registry.canonical_name("CRM").as_deref(), Some("hubspot"));
        assert_eq!(registry.canonical_name("mail").as_deref(), Some("gmail"));
    }

    #[test]
    fn unknown_service_yields_none_not_an_error() {
        let registry = default_registry(&reqwest::Client::new());
        assert!(registry.lookup("notion").is_none());
        assert!(registry.canonical_name("jira").is_none());
    }

    #[test]
    fn enabling_with_an_invalid_config_is_rejected() {
        let registry = default_registry(&reqwest::Client::new());
        let now = chrono::Utc::now();

        let mut record = majordome_core::UserIntegration::new("u-1", "hubspot", now);
        record.enabled = true;
        let error = registry.validate_enablement(&record).expect_err("missing portal_id");
        assert!(error.message.contains("portal_id"));

        record.config.insert("portal_id".to_string(), serde_json::json!("12345"));
        assert!(registry.validate_enablement(&record).is_ok());

        // Disabled records are exempt from the schema.
        let bare = majordome_core::UserIntegration::new("u-1", "hubspot", now);
        assert!(registry.validate_enablement(&bare).is_ok());
    }
}
