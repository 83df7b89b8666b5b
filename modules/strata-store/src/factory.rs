//! StateFactory: the registry of materialized state nodes.
//!
//! Resolves which nodes handle an action type and materializes new nodes
//! when root or feature states are registered.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use strata_core::{Result, StatePath, StateTree, StoreError};
use tracing::info;

use crate::state::{HandlerFn, StateDefinition, StateNode};

/// Nodes materialized by one registration call plus their defaults, laid
/// out at their paths.
#[derive(Debug, Clone)]
pub struct StatesAndDefaults {
    pub states: Vec<Arc<StateNode>>,
    pub defaults: Value,
}

impl StatesAndDefaults {
    pub fn names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.name.clone()).collect()
    }
}

#[derive(Default)]
pub struct StateFactory {
    nodes: RwLock<Vec<Arc<StateNode>>>,
}

impl StateFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `definitions` (and their children) and return the new nodes
    /// with their defaults.
    ///
    /// Validation happens before anything is registered: an invalid name or a
    /// path collision, within the batch or against earlier registrations,
    /// fails the whole call and leaves the registry unchanged.
    pub fn add_and_return_defaults(
        &self,
        definitions: Vec<StateDefinition>,
    ) -> Result<StatesAndDefaults> {
        let mut pending = Vec::new();
        for definition in definitions {
            materialize(definition, &StatePath::root(), &mut pending)?;
        }

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);

        let mut seen: HashSet<StatePath> = nodes.iter().map(|n| n.path.clone()).collect();
        for node in &pending {
            if !seen.insert(node.path.clone()) {
                return Err(StoreError::DuplicateStatePath {
                    path: node.path.to_string(),
                });
            }
        }

        // Parents precede their children, so child defaults land inside the
        // parent's object.
        let defaults = pending
            .iter()
            .fold(StateTree::empty(), |tree, node| {
                tree.set(&node.path, node.defaults.clone())
            })
            .into_value();

        let states: Vec<Arc<StateNode>> = pending.into_iter().map(Arc::new).collect();
        nodes.extend(states.iter().cloned());

        info!(added = states.len(), total = nodes.len(), "Registered states");

        Ok(StatesAndDefaults { states, defaults })
    }

    /// Every `(node, handler)` bound to `action_type`, in node registration
    /// order then handler declaration order.
    pub fn handlers_for(&self, action_type: &str) -> Vec<(Arc<StateNode>, HandlerFn)> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes
            .iter()
            .flat_map(|node| {
                node.handlers_for(action_type)
                    .map(|handler| (Arc::clone(node), Arc::clone(handler)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn get(&self, path: &StatePath) -> Option<Arc<StateNode>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.iter().find(|n| &n.path == path).cloned()
    }

    pub fn paths(&self) -> Vec<StatePath> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.iter().map(|n| n.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pre-order walk: the node itself, then its children under its path.
fn materialize(
    definition: StateDefinition,
    parent: &StatePath,
    out: &mut Vec<StateNode>,
) -> Result<()> {
    StatePath::validate_name(&definition.name)?;
    let path = parent.child(definition.name.clone());

    let StateDefinition {
        name,
        defaults,
        handlers,
        on_init,
        after_bootstrap,
        children,
    } = definition;

    out.push(StateNode {
        name,
        path: path.clone(),
        defaults,
        handlers,
        on_init,
        after_bootstrap,
    });

    for child in children {
        materialize(child, &path, out)?;
    }
    Ok(())
}

/// Flatten grouped registrations (one group per feature module) into a
/// single list, keeping order.
pub fn flatten_states(groups: Vec<Vec<StateDefinition>>) -> Vec<StateDefinition> {
    groups.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn children_nest_under_parent_path_and_defaults() {
        let factory = StateFactory::new();
        let results = factory
            .add_and_return_defaults(vec![StateDefinition::new("app")
                .defaults(json!({"title": "demo"}))
                .child(StateDefinition::new("todos").defaults(json!({"items": []})))])
            .unwrap();

        let paths: Vec<String> = results.states.iter().map(|s| s.path.to_string()).collect();
        assert_eq!(paths, vec!["app", "app.todos"]);
        assert_eq!(
            results.defaults,
            json!({"app": {"title": "demo", "todos": {"items": []}}})
        );
    }

    #[test]
    fn collision_inside_one_batch_registers_nothing() {
        let factory = StateFactory::new();
        let err = factory
            .add_and_return_defaults(vec![
                StateDefinition::new("todos"),
                StateDefinition::new("todos"),
            ])
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateStatePath { ref path } if path == "todos"));
        assert!(factory.is_empty());
    }

    #[test]
    fn invalid_name_is_a_config_error() {
        let factory = StateFactory::new();
        let err = factory
            .add_and_return_defaults(vec![StateDefinition::new("bad-name")])
            .unwrap_err();
        assert!(err.is_config());
        assert!(factory.is_empty());
    }
}
