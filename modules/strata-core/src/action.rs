//! Actions: typed, immutable requests to change state.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Dispatched once when the root states are registered.
pub const INIT_STATE: &str = "@@INIT";

/// Dispatched each time feature states are added after the root.
pub const UPDATE_STATE: &str = "@@UPDATE_STATE";

/// An action as seen by plugins and handlers. The caller builds this; the
/// dispatcher never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Build an action from anything that serializes to JSON.
    pub fn from_serialize<T: Serialize>(
        action_type: impl Into<String>,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(action_type).with_payload(serde_json::to_value(payload)?))
    }

    /// Decode the payload into a typed struct.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn init_state() -> Self {
        Self::new(INIT_STATE)
    }

    /// `UpdateState` carrying the names of the states that were just added.
    pub fn update_state<I, S>(added_states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added: Vec<String> = added_states.into_iter().map(Into::into).collect();
        Self::new(UPDATE_STATE).with_payload(json!({ "addedStates": added }))
    }

    pub fn is(&self, action_type: &str) -> bool {
        self.action_type == action_type
    }
}

/// Zero, one or many actions submitted in a single dispatch call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionBatch(Vec<Action>);

impl ActionBatch {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.0.iter()
    }
}

impl IntoIterator for ActionBatch {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Action> for ActionBatch {
    fn from(action: Action) -> Self {
        Self(vec![action])
    }
}

impl From<Vec<Action>> for ActionBatch {
    fn from(actions: Vec<Action>) -> Self {
        Self(actions)
    }
}

impl<const N: usize> From<[Action; N]> for ActionBatch {
    fn from(actions: [Action; N]) -> Self {
        Self(actions.into())
    }
}
