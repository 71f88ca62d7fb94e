use serde_json::Value;

/// Filter evaluated against a stored JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    /// Top-level field equals `value`. A missing field compares as `null`.
    FieldEquals { field: String, value: Value },
    /// Top-level array field holds at least one object whose fields all equal `criteria`.
    AnyElementMatches {
        field: String,
        criteria: Vec<(String, Value)>,
    },
}

impl Predicate {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_element_matches<I, K, V>(field: impl Into<String>, criteria: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Predicate::AnyElementMatches {
            field: field.into(),
            criteria: criteria
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Predicate::All => true,
            Predicate::FieldEquals { field, value } => {
                document.get(field).unwrap_or(&Value::Null) == value
            }
            Predicate::AnyElementMatches { field, criteria } => document
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| {
                    items.iter().any(|item| {
                        criteria
                            .iter()
                            .all(|(key, expected)| item.get(key) == Some(expected))
                    })
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub collection: String,
    pub predicate: Predicate,
    pub wait_for_non_stale_results: bool,
    pub skip: usize,
    pub take: Option<usize>,
}

impl DocumentQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            predicate: Predicate::All,
            wait_for_non_stale_results: false,
            skip: 0,
            take: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Block until the index has caught up with the last write made through the store.
    pub fn wait_for_non_stale_results_as_of_last_write(mut self) -> Self {
        self.wait_for_non_stale_results = true;
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }

    /// Applies filtering and paging to documents already sorted by id.
    pub fn select<'a, I>(&self, documents: I) -> Vec<Value>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        documents
            .into_iter()
            .filter(|doc| self.predicate.matches(doc))
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Server-side single-field update applied outside the unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchCommand {
    Inc { field: String, delta: i64 },
    Set { field: String, value: Value },
}

impl PatchCommand {
    pub fn inc(field: impl Into<String>, delta: i64) -> Self {
        PatchCommand::Inc {
            field: field.into(),
            delta,
        }
    }

    /// Applies the command in place; `Inc` treats a missing or non-integer field as 0.
    pub fn apply(&self, document: &mut serde_json::Map<String, Value>) {
        match self {
            PatchCommand::Inc { field, delta } => {
                let current = document.get(field).and_then(Value::as_i64).unwrap_or(0);
                document.insert(field.clone(), Value::from(current + delta));
            }
            PatchCommand::Set { field, value } => {
                document.insert(field.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_equals_treats_missing_as_null() {
        let doc = json!({ "UserName": "alice" });
        assert!(Predicate::field_equals("UserName", "alice").matches(&doc));
        assert!(!Predicate::field_equals("UserName", "bob").matches(&doc));
        assert!(Predicate::field_equals("Email", Value::Null).matches(&doc));
    }

    #[test]
    fn any_element_requires_every_criterion_on_one_element() {
        let doc = json!({
            "Logins": [
                { "LoginProvider": "github", "ProviderKey": "1" },
                { "LoginProvider": "google", "ProviderKey": "2" }
            ]
        });
        let hit = Predicate::any_element_matches(
            "Logins",
            [("LoginProvider", "google"), ("ProviderKey", "2")],
        );
        let crossed = Predicate::any_element_matches(
            "Logins",
            [("LoginProvider", "github"), ("ProviderKey", "2")],
        );
        assert!(hit.matches(&doc));
        assert!(!crossed.matches(&doc));
        assert!(!hit.matches(&json!({ "Logins": "nope" })));
    }

    #[test]
    fn select_pages_after_filtering() {
        let docs: Vec<Value> = (0..5).map(|i| json!({ "N": i, "Even": i % 2 == 0 })).collect();
        let query = DocumentQuery::new("c")
            .filter(Predicate::field_equals("Even", true))
            .skip(1)
            .take(1);
        assert_eq!(query.select(&docs), vec![json!({ "N": 2, "Even": true })]);
    }

    #[test]
    fn inc_starts_from_zero() {
        let mut doc = serde_json::Map::new();
        PatchCommand::inc("AccessFailedCount", 1).apply(&mut doc);
        PatchCommand::inc("AccessFailedCount", 1).apply(&mut doc);
        assert_eq!(doc["AccessFailedCount"], 2);
    }
}
