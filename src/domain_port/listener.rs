use super::METADATA_FIELD;
use crate::domain_model::IdentityUser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

pub const UNIQUE_CONSTRAINTS_KEY: &str = "Ensure-Unique-Constraints";

pub struct StoreEvent<'a> {
    pub collection: &'a str,
    pub id: &'a str,
    pub document: &'a mut Value,
}

/// Hook run by a session on every buffered put right before it is flushed.
pub trait StoreListener: Send + Sync + fmt::Debug {
    fn before_store(&self, event: &mut StoreEvent<'_>);

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UniqueConstraint {
    pub field: String,
    pub value: String,
}

/// Marks documents with the values that must stay unique within their collection.
///
/// The listener only writes metadata. Whether a conflicting write is rejected
/// depends on the backing store, and a store that enforces it may still expose
/// duplicates to queries until its index catches up.
#[derive(Debug, Clone, Default)]
pub struct UniqueConstraintsListener {
    constraints: HashMap<String, Vec<String>>,
}

impl UniqueConstraintsListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constraint(mut self, collection: &str, field: &str) -> Self {
        let fields = self.constraints.entry(collection.to_string()).or_default();
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
        self
    }

    pub fn for_identity_users() -> Self {
        IdentityUser::UNIQUE_FIELDS
            .iter()
            .fold(Self::new(), |listener, field| {
                listener.with_constraint(IdentityUser::COLLECTION, field)
            })
    }
}

impl StoreListener for UniqueConstraintsListener {
    fn before_store(&self, event: &mut StoreEvent<'_>) {
        let Some(fields) = self.constraints.get(event.collection) else {
            return;
        };

        let constraints: Vec<UniqueConstraint> = fields
            .iter()
            .filter_map(|field| {
                let value = event.document.get(field)?.as_str()?;
                (!value.is_empty()).then(|| UniqueConstraint {
                    field: field.clone(),
                    value: value.to_string(),
                })
            })
            .collect();

        let Some(doc) = event.document.as_object_mut() else {
            return;
        };
        let metadata = doc
            .entry(METADATA_FIELD)
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(metadata) = metadata.as_object_mut() {
            match serde_json::to_value(constraints) {
                Ok(value) => {
                    metadata.insert(UNIQUE_CONSTRAINTS_KEY.to_string(), value);
                }
                Err(e) => tracing::warn!(id = event.id, error = %e, "unique constraints skipped"),
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reads the constraint markers written by [`UniqueConstraintsListener`].
pub fn unique_constraints(document: &Value) -> Vec<UniqueConstraint> {
    document
        .get(METADATA_FIELD)
        .and_then(|m| m.get(UNIQUE_CONSTRAINTS_KEY))
        .and_then(|c| serde_json::from_value(c.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn marks_non_empty_configured_fields() {
        let listener = UniqueConstraintsListener::for_identity_users();
        let mut doc = json!({ "UserName": "alice", "Email": "", "PhoneNumber": "555" });
        listener.before_store(&mut StoreEvent {
            collection: IdentityUser::COLLECTION,
            id: "IdentityUsers/1",
            document: &mut doc,
        });

        assert_eq!(
            unique_constraints(&doc),
            vec![UniqueConstraint {
                field: "UserName".to_string(),
                value: "alice".to_string(),
            }]
        );
    }

    #[test]
    fn leaves_other_collections_alone() {
        let listener = UniqueConstraintsListener::for_identity_users();
        let mut doc = json!({ "UserName": "alice" });
        listener.before_store(&mut StoreEvent {
            collection: "Roles",
            id: "Roles/1",
            document: &mut doc,
        });
        assert!(doc.get(METADATA_FIELD).is_none());
    }
}
