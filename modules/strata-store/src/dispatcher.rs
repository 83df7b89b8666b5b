//! The dispatch loop.
//!
//! snapshot → plugin chain → handlers on a draft → commit → publish.
//! Top-level dispatches are serialized through an async gate; nested
//! dispatches issued from a [`StateContext`] run re-entrantly on the
//! caller's draft and are published with the outer commit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use strata_core::{Action, ActionBatch, Result, StatePath, StateTree, StoreError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::StateContext;
use crate::execution::{EnterStrategy, ExecutionStrategy};
use crate::factory::StateFactory;
use crate::plugin::{self, Next, Plugin};
use crate::state::HookFn;

/// Buffered completions per subscriber before slow receivers start lagging.
pub const ACTION_STREAM_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionStatus {
    Successful,
    Errored,
}

/// Published on the process-wide action stream after each traversal of the
/// pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ActionCompletion {
    pub dispatch_id: Uuid,
    pub action: Action,
    pub status: ActionStatus,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ActionCompletion {
    fn successful(dispatch_id: Uuid, action: Action) -> Self {
        Self {
            dispatch_id,
            action,
            status: ActionStatus::Successful,
            error: None,
            completed_at: Utc::now(),
        }
    }

    fn errored(dispatch_id: Uuid, action: Action, error: &StoreError) -> Self {
        Self {
            dispatch_id,
            action,
            status: ActionStatus::Errored,
            error: Some(error.to_string()),
            completed_at: Utc::now(),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct DispatcherShared {
    current: RwLock<StateTree>,
    gate: tokio::sync::Mutex<()>,
    plugins: Vec<Arc<dyn Plugin>>,
    factory: Arc<StateFactory>,
    strategy: Arc<dyn ExecutionStrategy>,
    completions: broadcast::Sender<ActionCompletion>,
    states: watch::Sender<StateTree>,
    development_mode: bool,
}

/// Owns the current tree and is the only writer of it.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<DispatcherShared>,
}

impl Dispatcher {
    pub fn new(
        initial: StateTree,
        plugins: Vec<Arc<dyn Plugin>>,
        factory: Arc<StateFactory>,
        strategy: Arc<dyn ExecutionStrategy>,
        development_mode: bool,
    ) -> Self {
        let (completions, _) = broadcast::channel(ACTION_STREAM_CAPACITY);
        let (states, _) = watch::channel(initial.clone());
        Self {
            shared: Arc::new(DispatcherShared {
                current: RwLock::new(initial),
                gate: tokio::sync::Mutex::new(()),
                plugins,
                factory,
                strategy,
                completions,
                states,
                development_mode,
            }),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> StateTree {
        self.shared
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe_states(&self) -> watch::Receiver<StateTree> {
        self.shared.states.subscribe()
    }

    pub fn subscribe_actions(&self) -> broadcast::Receiver<ActionCompletion> {
        self.shared.completions.subscribe()
    }

    pub fn strategy(&self) -> Arc<dyn ExecutionStrategy> {
        Arc::clone(&self.shared.strategy)
    }

    /// Dispatch zero, one or many actions.
    ///
    /// Actions run one after another; the first failure is returned and the
    /// rest of the batch is skipped. Each successful action is committed on
    /// its own. The returned future polls through `strategy.enter`.
    pub fn dispatch(&self, actions: impl Into<ActionBatch>) -> EnterStrategy<()> {
        let batch = actions.into();
        let this = self.clone();
        EnterStrategy::new(
            self.strategy(),
            async move { this.dispatch_batch(batch).await }.boxed(),
        )
    }

    async fn dispatch_batch(&self, batch: ActionBatch) -> Result<()> {
        for action in batch {
            self.dispatch_single(action).await?;
        }
        Ok(())
    }

    async fn dispatch_single(&self, action: Action) -> Result<()> {
        let dispatch_id = Uuid::new_v4();
        let _gate = self.shared.gate.lock().await;

        debug!(%dispatch_id, action_type = %action.action_type, "Dispatching action");

        let scope = DispatchScope::new(self.clone(), dispatch_id);
        match scope.run_chain(self.snapshot(), action.clone()).await {
            Ok(next) => {
                let mut published = scope.take_completed();
                published.push(ActionCompletion::successful(dispatch_id, action));
                self.commit(next, published)
            }
            Err(err) => {
                let err = StoreError::from_chain(err);
                warn!(
                    %dispatch_id,
                    action_type = %action.action_type,
                    error = %err,
                    "Action failed"
                );
                // Nested successes were discarded with the draft; their
                // failures still get reported.
                let mut published: Vec<ActionCompletion> = scope
                    .take_completed()
                    .into_iter()
                    .filter(|c| c.status == ActionStatus::Errored)
                    .collect();
                published.push(ActionCompletion::errored(dispatch_id, action, &err));
                // The action's own error wins over a strategy that drops the work.
                let _ = self.publish(published);
                Err(err)
            }
        }
    }

    /// Run `hook` against a draft bound to `path` and commit the draft if the
    /// hook succeeds. Serialized with dispatches.
    pub(crate) async fn transact(
        &self,
        path: &StatePath,
        hook_name: &'static str,
        hook: HookFn,
    ) -> Result<()> {
        let dispatch_id = Uuid::new_v4();
        let _gate = self.shared.gate.lock().await;

        let scope = DispatchScope::new(self.clone(), dispatch_id);
        let draft = Arc::new(Mutex::new(self.snapshot()));
        let ctx = StateContext::new(path.clone(), Arc::clone(&draft), scope.clone());

        hook(ctx).await.map_err(|source| StoreError::Hook {
            hook: hook_name,
            path: path.to_string(),
            source,
        })?;

        let next = lock(&draft).clone();
        self.commit(next, scope.take_completed())
    }

    /// Apply `update` to the current tree outside of any action.
    pub(crate) async fn replace_with(
        &self,
        update: impl FnOnce(&StateTree) -> StateTree,
    ) -> Result<()> {
        let _gate = self.shared.gate.lock().await;
        let next = update(&self.snapshot());
        self.commit(next, Vec::new())
    }

    fn commit(&self, next: StateTree, published: Vec<ActionCompletion>) -> Result<()> {
        let shared = &self.shared;
        shared.strategy.leave(|| {
            *shared.current.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
            shared.states.send_replace(next);
            for completion in published {
                // No subscribers is fine.
                let _ = shared.completions.send(completion);
            }
        })
    }

    fn publish(&self, published: Vec<ActionCompletion>) -> Result<()> {
        let completions = &self.shared.completions;
        self.shared.strategy.leave(|| {
            for completion in published {
                let _ = completions.send(completion);
            }
        })
    }
}

// ---------------------------------------------------------------------------
// DispatchScope
// ---------------------------------------------------------------------------

/// One top-level dispatch (or hook transaction) and the nested dispatches it
/// spawns.
#[derive(Clone)]
pub(crate) struct DispatchScope {
    dispatcher: Dispatcher,
    dispatch_id: Uuid,
    completed: Arc<Mutex<Vec<ActionCompletion>>>,
}

impl DispatchScope {
    fn new(dispatcher: Dispatcher, dispatch_id: Uuid) -> Self {
        Self {
            dispatcher,
            dispatch_id,
            completed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn take_completed(&self) -> Vec<ActionCompletion> {
        std::mem::take(&mut *lock(&self.completed))
    }

    pub(crate) fn snapshot(&self) -> StateTree {
        self.dispatcher.snapshot()
    }

    fn run_chain(
        &self,
        state: StateTree,
        action: Action,
    ) -> BoxFuture<'static, anyhow::Result<StateTree>> {
        plugin::compose(&self.dispatcher.shared.plugins, self.terminal()).run(state, action)
    }

    fn terminal(&self) -> Next {
        let scope = self.clone();
        Next::new(move |state, action| {
            let scope = scope.clone();
            async move { scope.apply_handlers(state, action).await }.boxed()
        })
    }

    /// Terminal step: run every matching handler against one draft.
    async fn apply_handlers(&self, state: StateTree, action: Action) -> anyhow::Result<StateTree> {
        let bindings = self.dispatcher.shared.factory.handlers_for(&action.action_type);
        if self.dispatcher.shared.development_mode {
            warn_on_overlap(&action.action_type, bindings.iter().map(|(node, _)| &node.path));
        }

        let draft = Arc::new(Mutex::new(state));
        for (node, handler) in bindings {
            let ctx = StateContext::new(node.path.clone(), Arc::clone(&draft), self.clone());
            handler(ctx, action.clone())
                .await
                .map_err(|source| StoreError::Handler {
                    action_type: action.action_type.clone(),
                    path: node.path.to_string(),
                    source,
                })?;
        }

        let next = lock(&draft).clone();
        Ok(next)
    }

    /// Dispatch from inside a handler or hook. Each action reads the draft,
    /// runs the full chain and writes its result back on success.
    pub(crate) async fn dispatch_nested(
        &self,
        draft: &Arc<Mutex<StateTree>>,
        batch: ActionBatch,
    ) -> Result<()> {
        for action in batch {
            debug!(
                dispatch_id = %self.dispatch_id,
                action_type = %action.action_type,
                "Dispatching nested action"
            );
            let state = lock(draft).clone();
            match self.run_chain(state, action.clone()).await {
                Ok(next) => {
                    *lock(draft) = next;
                    lock(&self.completed)
                        .push(ActionCompletion::successful(self.dispatch_id, action));
                }
                Err(err) => {
                    let err = StoreError::from_chain(err);
                    lock(&self.completed).push(ActionCompletion::errored(
                        self.dispatch_id,
                        action,
                        &err,
                    ));
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// Handlers on overlapping paths write to the same draft in registration
/// order; the later writer wins.
fn warn_on_overlap<'a>(action_type: &str, paths: impl Iterator<Item = &'a StatePath>) {
    let paths: Vec<&StatePath> = paths.collect();
    for (i, a) in paths.iter().enumerate() {
        for b in &paths[i + 1..] {
            if a != b && a.overlaps(b) {
                warn!(
                    action_type,
                    first = %a,
                    second = %b,
                    "Handlers on overlapping state paths; later registration wins"
                );
            }
        }
    }
}
