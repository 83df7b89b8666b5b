//! StateContext: what a handler or lifecycle hook sees of the tree.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use strata_core::{ActionBatch, Result, StatePath, StateTree};

use crate::dispatcher::{lock, DispatchScope};

/// Bound to one state path and to the draft of the dispatch it runs in.
/// Writes become visible to later handlers of the same dispatch and are
/// committed only if the whole dispatch succeeds.
#[derive(Clone)]
pub struct StateContext {
    path: StatePath,
    draft: Arc<Mutex<StateTree>>,
    scope: DispatchScope,
}

impl StateContext {
    pub(crate) fn new(path: StatePath, draft: Arc<Mutex<StateTree>>, scope: DispatchScope) -> Self {
        Self { path, draft, scope }
    }

    pub fn path(&self) -> &StatePath {
        &self.path
    }

    /// Value of this state in the draft.
    pub fn get_state(&self) -> Value {
        lock(&self.draft).value_at(&self.path)
    }

    pub fn get_state_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.get_state()).map_err(anyhow::Error::from)?)
    }

    /// The whole draft tree, for handlers that read other slices.
    pub fn root_state(&self) -> StateTree {
        lock(&self.draft).clone()
    }

    /// Last committed tree, ignoring writes made by this dispatch.
    pub fn committed_state(&self) -> StateTree {
        self.scope.snapshot()
    }

    /// Replace this state's value.
    pub fn set_state(&self, value: Value) -> Value {
        let mut draft = lock(&self.draft);
        *draft = draft.set(&self.path, value.clone());
        value
    }

    /// Replace this state's value with `operator(existing)`.
    ///
    /// The draft is not locked while `operator` runs, so it may read the
    /// context.
    pub fn set_state_with(&self, operator: impl FnOnce(&Value) -> Value) -> Value {
        let existing = self.get_state();
        let value = operator(&existing);
        self.set_state(value)
    }

    /// Merge `partial` into this state's object, keeping sibling keys.
    pub fn patch_state(&self, partial: Value) -> Result<Value> {
        let mut draft = lock(&self.draft);
        let patched = draft.patch(&self.path, partial)?;
        let value = patched.value_at(&self.path);
        *draft = patched;
        Ok(value)
    }

    /// Dispatch more actions as part of the current dispatch.
    ///
    /// The actions run through the full plugin chain against this draft. Do
    /// not call `Store::dispatch` from a handler: top-level dispatches wait
    /// for the current one to finish.
    pub async fn dispatch(&self, actions: impl Into<ActionBatch>) -> Result<()> {
        let batch = actions.into();
        self.scope.dispatch_nested(&self.draft, batch).await
    }
}
