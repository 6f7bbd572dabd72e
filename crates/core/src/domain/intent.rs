use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Slot values collected during a dialogue, keyed by slot name. A `BTreeMap`
/// keeps replies and tests deterministic.
pub type SlotValues = BTreeMap<String, String>;

/// What a slot expects; drives the per-slot parser/validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Text,
    Email,
    DueDate,
}

/// One named piece of information an action needs, with the prompt shown to
/// the user while collecting it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub name: &'static str,
    pub prompt: &'static str,
    pub kind: SlotKind,
    pub required: bool,
}

/// Per-adapter table entry describing one operation: its slots and whether a
/// confirmation turn is demanded before committing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub name: &'static str,
    pub slots: &'static [SlotDescriptor],
    pub requires_confirmation: bool,
}

impl ActionDescriptor {
    pub fn slot(&self, name: &str) -> Option<&SlotDescriptor> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    /// First required slot without a non-empty value, in declaration order.
    pub fn first_missing_required(&self, values: &SlotValues) -> Option<&SlotDescriptor> {
        self.slots.iter().find(|slot| {
            slot.required
                && values.get(slot.name).map_or(true, |value| value.trim().is_empty())
        })
    }

    pub fn missing_required(&self, values: &SlotValues) -> Vec<&'static str> {
        self.slots
            .iter()
            .filter(|slot| {
                slot.required
                    && values.get(slot.name).map_or(true, |value| value.trim().is_empty())
            })
            .map(|slot| slot.name)
            .collect()
    }
}

/// A service the classifier considers plausible for an ambiguous utterance,
/// with the action it detected for that service when any.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCandidate {
    pub service: String,
    pub action: Option<String>,
}

/// An integration request extracted from an utterance: the target service,
/// optionally the action, and whatever parameters were already present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationIntent {
    pub service: String,
    pub action: Option<String>,
    pub parameters: SlotValues,
}

/// Classifier output. Exactly one of the five kinds for every utterance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Small talk; carries the canned reply when the short-circuit table hit.
    Conversation { reply: Option<String> },
    /// A question with no service attached; answered conversationally.
    GeneralQuery,
    Integration(IntegrationIntent),
    /// Several enabled services are plausible; the user must choose.
    Ambiguous { candidates: Vec<ServiceCandidate> },
    Error { message: String },
}

impl Intent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conversation { .. } => "conversation",
            Self::GeneralQuery => "general_query",
            Self::Integration(_) => "integration",
            Self::Ambiguous { .. } => "ambiguous",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionDescriptor, SlotDescriptor, SlotKind, SlotValues};

    const ACTION: ActionDescriptor = ActionDescriptor {
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
                prompt: "Dans quelle liste dois-je la créer ?",
                kind: SlotKind::Text,
                required: true,
            },
            SlotDescriptor {
                name: "due_date",
                prompt: "Pour quelle échéance ?",
                kind: SlotKind::DueDate,
                required: false,
            },
        ],
        requires_confirmation: false,
    };

    #[test]
    fn first_missing_required_follows_declaration_order() {
        let mut values = SlotValues::new();
        assert_eq!(ACTION.first_missing_required(&values).map(|s| s.name), Some("title"));

        values.insert("title".into(), "Préparer démo".into());
        assert_eq!(ACTION.first_missing_required(&values).map(|s| s.name), Some("list_name"));

        values.insert("list_name".into(), "En cours".into());
        assert_eq!(ACTION.first_missing_required(&values), None);
    }

    #[test]
    fn blank_values_do_not_satisfy_required_slots() {
        let mut values = SlotValues::new();
        values.insert("title".into(), "  ".into());
        assert_eq!(ACTION.missing_required(&values), vec!["title", "list_name"]);
    }

    #[test]
    fn optional_slots_are_never_reported_missing() {
        let mut values = SlotValues::new();
        values.insert("title".into(), "a".into());
        values.insert("list_name".into(), "b".into());
        assert!(ACTION.missing_required(&values).is_empty());
    }
}
