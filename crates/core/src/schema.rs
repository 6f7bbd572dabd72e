use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field kinds a service configuration schema may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Secret,
    Url,
    Email,
}

/// One entry of a per-service configuration schema. Schemas are declared as
/// const tables by each adapter and validated table-driven, never by
/// reflection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub help: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigSchema {
    pub fields: &'static [FieldDescriptor],
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("missing required config fields: {}", missing.join(", "))]
pub struct SchemaViolation {
    pub missing: Vec<&'static str>,
}

impl ConfigSchema {
    pub const EMPTY: ConfigSchema = ConfigSchema { fields: &[] };

    /// Structural check of an opaque config map: every `required` field must
    /// be present and non-empty. Returns the full list of missing fields.
    pub fn validate(&self, config: &Map<String, Value>) -> Result<(), SchemaViolation> {
        let missing: Vec<&'static str> = self
            .fields
            .iter()
            .filter(|field| field.required && !field_present(config, field.name))
            .map(|field| field.name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaViolation { missing })
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

fn field_present(config: &Map<String, Value>, name: &str) -> bool {
    match config.get(name) {
        Some(Value::String(value)) => !value.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}
