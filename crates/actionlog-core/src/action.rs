//! The action payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque structured payload with a `type` tag.
///
/// The log never interprets `fields`; they are stored and replicated
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Action {
    /// Create an action with no fields besides its type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a field, replacing any previous value under the same key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_json_shape() {
        let action = Action::new("user/rename").with("name", "Ann").with("id", 7);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "user/rename", "name": "Ann", "id": 7 })
        );

        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }
}
