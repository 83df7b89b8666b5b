//! Store: the application-facing handle, plus the registration glue that
//! wires root and feature states into the tree.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use strata_core::{Action, ActionBatch, Result, StatePath, StateTree};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::dispatcher::{ActionCompletion, Dispatcher};
use crate::execution::{
    DispatchOutsideDomainStrategy, EnterStrategy, ExecutionStrategy, HostDomain, SchedulingDomain,
};
use crate::factory::{StateFactory, StatesAndDefaults};
use crate::lifecycle::{LifecycleCoordinator, LifecyclePhase};
use crate::plugin::Plugin;
use crate::state::StateDefinition;

/// Cloneable handle; clones share one tree, one registry and one dispatcher.
#[derive(Clone)]
pub struct Store {
    dispatcher: Dispatcher,
    factory: Arc<StateFactory>,
    lifecycle: Arc<LifecycleCoordinator>,
    config: Arc<StoreConfig>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Dispatch one action or a batch. Resolves once every action has gone
    /// through the pipeline, or with the first failure.
    pub fn dispatch(&self, actions: impl Into<ActionBatch>) -> EnterStrategy<()> {
        self.dispatcher.dispatch(actions)
    }

    pub fn snapshot(&self) -> StateTree {
        self.dispatcher.snapshot()
    }

    pub fn select(&self, path: impl Into<StatePath>) -> Value {
        self.snapshot().value_at(&path.into())
    }

    pub fn select_as<T: DeserializeOwned>(&self, path: impl Into<StatePath>) -> Result<T> {
        Ok(serde_json::from_value(self.select(path)).map_err(anyhow::Error::from)?)
    }

    /// Every committed tree, starting with the current one.
    pub fn subscribe(&self) -> watch::Receiver<StateTree> {
        self.dispatcher.subscribe_states()
    }

    /// Completion of every dispatched action, nested ones included.
    pub fn actions(&self) -> broadcast::Receiver<ActionCompletion> {
        self.dispatcher.subscribe_actions()
    }

    /// Replace the whole tree without dispatching.
    pub async fn reset(&self, tree: StateTree) -> Result<()> {
        self.dispatcher.replace_with(move |_| tree).await
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn factory(&self) -> &StateFactory {
        &self.factory
    }

    pub fn lifecycle_phase(&self, path: impl Into<StatePath>) -> LifecyclePhase {
        self.lifecycle.phase(&path.into())
    }

    // -----------------------------------------------------------------------
    // Registration glue
    // -----------------------------------------------------------------------

    /// Register the root states and dispatch `InitState`.
    pub async fn register_root(&self, states: Vec<StateDefinition>) -> Result<StatesAndDefaults> {
        let results = self.factory.add_and_return_defaults(states)?;
        self.set_state_to_the_current_with_new(&results).await?;
        self.lifecycle.bootstrap(Action::init_state(), &results).await?;
        info!(states = ?results.names(), "Root states registered");
        Ok(results)
    }

    /// Register feature states (one group per feature) and dispatch
    /// `UpdateState`.
    pub async fn register_feature(
        &self,
        groups: Vec<Vec<StateDefinition>>,
    ) -> Result<StatesAndDefaults> {
        let states = crate::factory::flatten_states(groups);
        let results = self.factory.add_and_return_defaults(states)?;
        self.set_state_to_the_current_with_new(&results).await?;
        self.lifecycle
            .bootstrap(Action::update_state(results.names()), &results)
            .await?;
        info!(states = ?results.names(), "Feature states registered");
        Ok(results)
    }

    /// Merge freshly registered defaults into the current tree, node by node,
    /// so existing siblings of a nested node survive.
    pub async fn set_state_to_the_current_with_new(
        &self,
        results: &StatesAndDefaults,
    ) -> Result<()> {
        let defaults = StateTree::new(results.defaults.clone());
        let paths: Vec<StatePath> = results.states.iter().map(|s| s.path.clone()).collect();
        self.dispatcher
            .replace_with(move |current| {
                paths.iter().fold(current.clone(), |tree, path| {
                    tree.set(path, defaults.value_at(path))
                })
            })
            .await
    }

    /// Signal that the host application finished bootstrapping; runs
    /// deferred `after_bootstrap` hooks.
    pub async fn notify_app_bootstrapped(&self) -> Result<()> {
        self.lifecycle.notify_app_bootstrapped().await
    }
}

// ---------------------------------------------------------------------------
// StoreBuilder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    plugins: Vec<Arc<dyn Plugin>>,
    domain: Option<Arc<dyn SchedulingDomain>>,
}

impl StoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a plugin. The first plugin added is the outermost.
    pub fn plugin(self, plugin: impl Plugin + 'static) -> Self {
        self.plugin_arc(Arc::new(plugin))
    }

    pub fn plugin_arc(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Scheduling domain for the default execution strategy. Defaults to a
    /// fresh [`HostDomain`].
    pub fn domain(mut self, domain: Arc<dyn SchedulingDomain>) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn build(self) -> Store {
        let config = self.config;

        let strategy: Arc<dyn ExecutionStrategy> = match &config.execution_strategy {
            Some(strategy) => Arc::clone(strategy),
            None => {
                let domain = self
                    .domain
                    .unwrap_or_else(|| Arc::new(HostDomain::new()) as Arc<dyn SchedulingDomain>);
                Arc::new(DispatchOutsideDomainStrategy::new(domain, config.platform))
            }
        };

        if config.compatibility.strict_content_security_policy {
            debug!("Strict CSP requested; plugin chain is composed from closures");
        }

        let initial = StateTree::empty().merge(&config.defaults_state);
        let factory = Arc::new(StateFactory::new());
        let dispatcher = Dispatcher::new(
            initial,
            self.plugins,
            Arc::clone(&factory),
            strategy,
            config.development_mode,
        );
        let lifecycle = Arc::new(LifecycleCoordinator::new(dispatcher.clone()));

        Store {
            dispatcher,
            factory,
            lifecycle,
            config: Arc::new(config),
        }
    }
}
