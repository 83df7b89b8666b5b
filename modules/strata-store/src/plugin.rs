//! The plugin chain: ordered middleware wrapping the terminal dispatch step.
//!
//! The chain is a right-to-left fold of the plugin list over the terminal
//! step, so the first registered plugin is the outermost wrapper. A plugin
//! continues with `next.run(state, action)` or short-circuits by returning
//! its own tree.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use strata_core::{Action, StateTree};
use tracing::{debug, info, warn};

type NextFn =
    dyn Fn(StateTree, Action) -> BoxFuture<'static, anyhow::Result<StateTree>> + Send + Sync;

/// The remainder of the chain, terminal step included.
#[derive(Clone)]
pub struct Next(Arc<NextFn>);

impl Next {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(StateTree, Action) -> BoxFuture<'static, anyhow::Result<StateTree>>
            + Send
            + Sync
            + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn run(
        &self,
        state: StateTree,
        action: Action,
    ) -> BoxFuture<'static, anyhow::Result<StateTree>> {
        (self.0)(state, action)
    }
}

/// Handles the state/action pair before it reaches the state handlers.
///
/// The returned tree is what the dispatcher commits.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn handle(
        &self,
        state: StateTree,
        action: Action,
        next: Next,
    ) -> anyhow::Result<StateTree>;
}

/// Fold `plugins` over `terminal`. `plugins[0]` runs first on entry and
/// resolves last.
pub fn compose(plugins: &[Arc<dyn Plugin>], terminal: Next) -> Next {
    plugins.iter().rev().fold(terminal, |next, plugin| {
        let plugin = Arc::clone(plugin);
        Next::new(move |state, action| {
            let plugin = Arc::clone(&plugin);
            let next = next.clone();
            async move { plugin.handle(state, action, next).await }.boxed()
        })
    })
}

// ---------------------------------------------------------------------------
// Closure plugins
// ---------------------------------------------------------------------------

/// Adapts a closure `(state, action, next) -> future` into a [`Plugin`].
pub struct PluginFn<F>(F);

pub fn plugin_fn<F>(f: F) -> PluginFn<F>
where
    F: Fn(StateTree, Action, Next) -> BoxFuture<'static, anyhow::Result<StateTree>> + Send + Sync,
{
    PluginFn(f)
}

#[async_trait]
impl<F> Plugin for PluginFn<F>
where
    F: Fn(StateTree, Action, Next) -> BoxFuture<'static, anyhow::Result<StateTree>> + Send + Sync,
{
    async fn handle(
        &self,
        state: StateTree,
        action: Action,
        next: Next,
    ) -> anyhow::Result<StateTree> {
        (self.0)(state, action, next).await
    }
}

// ---------------------------------------------------------------------------
// LoggerPlugin
// ---------------------------------------------------------------------------

/// Logs every action passing through the chain, with timing and outcome.
#[derive(Debug, Default, Clone)]
pub struct LoggerPlugin {
    /// Also log the previous and next state at debug level.
    pub log_state: bool,
}

impl LoggerPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self) -> Self {
        self.log_state = true;
        self
    }
}

#[async_trait]
impl Plugin for LoggerPlugin {
    async fn handle(
        &self,
        state: StateTree,
        action: Action,
        next: Next,
    ) -> anyhow::Result<StateTree> {
        let action_type = action.action_type.clone();
        if self.log_state {
            debug!(action_type = %action_type, prev_state = %state.as_value(), "action received");
        }

        let started = Instant::now();
        let result = next.run(state, action).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(next_state) => {
                info!(action_type = %action_type, elapsed_ms, "action completed");
                if self.log_state {
                    debug!(
                        action_type = %action_type,
                        next_state = %next_state.as_value(),
                        "state after action"
                    );
                }
            }
            Err(e) => warn!(action_type = %action_type, elapsed_ms, error = %e, "action failed"),
        }

        result
    }
}
