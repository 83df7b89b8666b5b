//! Lifecycle hooks for newly registered states.
//!
//! Each node moves `Uninitialized → Initialized → Bootstrapped` at most once,
//! tracked by path. The guard does not rely on the factory's collision check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use strata_core::{Action, Result, StatePath};
use tracing::{debug, info};

use crate::dispatcher::{lock, Dispatcher};
use crate::factory::StatesAndDefaults;
use crate::state::StateNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Uninitialized,
    Initialized,
    Bootstrapped,
}

/// Per-path markers of transitions already taken.
#[derive(Debug, Default)]
pub struct LifecycleRegistry {
    phases: Mutex<HashMap<StatePath, LifecyclePhase>>,
}

impl LifecycleRegistry {
    pub fn phase(&self, path: &StatePath) -> LifecyclePhase {
        lock(&self.phases)
            .get(path)
            .copied()
            .unwrap_or(LifecyclePhase::Uninitialized)
    }

    /// Claim the transition into `to`. Returns false if the node is not in
    /// the phase directly before it.
    fn advance(&self, path: &StatePath, to: LifecyclePhase) -> bool {
        let from = match to {
            LifecyclePhase::Uninitialized => return false,
            LifecyclePhase::Initialized => LifecyclePhase::Uninitialized,
            LifecyclePhase::Bootstrapped => LifecyclePhase::Initialized,
        };

        let mut phases = lock(&self.phases);
        let current = phases
            .get(path)
            .copied()
            .unwrap_or(LifecyclePhase::Uninitialized);
        if current != from {
            return false;
        }
        phases.insert(path.clone(), to);
        true
    }
}

#[derive(Default)]
struct BootstrapQueue {
    app_bootstrapped: bool,
    pending: Vec<Arc<StateNode>>,
}

pub struct LifecycleCoordinator {
    dispatcher: Dispatcher,
    registry: LifecycleRegistry,
    queue: Mutex<BootstrapQueue>,
}

impl LifecycleCoordinator {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            registry: LifecycleRegistry::default(),
            queue: Mutex::new(BootstrapQueue::default()),
        }
    }

    pub fn phase(&self, path: &StatePath) -> LifecyclePhase {
        self.registry.phase(path)
    }

    pub fn is_app_bootstrapped(&self) -> bool {
        lock(&self.queue).app_bootstrapped
    }

    /// Dispatch `action` so plugins see the new tree shape, then run
    /// `on_init` for the new nodes. `after_bootstrap` runs now if the
    /// application has bootstrapped, otherwise once it does.
    pub async fn bootstrap(&self, action: Action, results: &StatesAndDefaults) -> Result<()> {
        self.dispatcher.dispatch(action).await?;
        self.invoke_init(&results.states).await?;

        {
            let mut queue = lock(&self.queue);
            if !queue.app_bootstrapped {
                debug!(pending = results.states.len(), "Deferring after_bootstrap hooks");
                queue.pending.extend(results.states.iter().cloned());
                return Ok(());
            }
        }

        self.invoke_bootstrap(&results.states).await
    }

    /// Mark the application as bootstrapped and flush deferred
    /// `after_bootstrap` hooks. Later calls are no-ops.
    pub async fn notify_app_bootstrapped(&self) -> Result<()> {
        let pending = {
            let mut queue = lock(&self.queue);
            if queue.app_bootstrapped {
                return Ok(());
            }
            queue.app_bootstrapped = true;
            std::mem::take(&mut queue.pending)
        };

        info!(pending = pending.len(), "Application bootstrapped");
        self.invoke_bootstrap(&pending).await
    }

    async fn invoke_init(&self, states: &[Arc<StateNode>]) -> Result<()> {
        for node in states {
            if !self.registry.advance(&node.path, LifecyclePhase::Initialized) {
                continue;
            }
            if let Some(hook) = &node.on_init {
                debug!(path = %node.path, "Running on_init");
                self.dispatcher
                    .transact(&node.path, "on_init", Arc::clone(hook))
                    .await?;
            }
        }
        Ok(())
    }

    async fn invoke_bootstrap(&self, states: &[Arc<StateNode>]) -> Result<()> {
        for node in states {
            if !self.registry.advance(&node.path, LifecyclePhase::Bootstrapped) {
                continue;
            }
            if let Some(hook) = &node.after_bootstrap {
                debug!(path = %node.path, "Running after_bootstrap");
                self.dispatcher
                    .transact(&node.path, "after_bootstrap", Arc::clone(hook))
                    .await?;
            }
        }
        Ok(())
    }
}
