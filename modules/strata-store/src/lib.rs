//! Dispatch and execution pipeline for the strata state container.
//!
//! An action passes through the plugin chain, reaches every handler bound to
//! its type, and the resulting tree is committed atomically. Lifecycle hooks
//! run when root or feature states are registered. An execution strategy
//! decides whether that work runs inside the host scheduling domain.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod execution;
pub mod factory;
pub mod lifecycle;
pub mod plugin;
pub mod state;
pub mod store;

pub use config::{Compatibility, StoreConfig};
pub use context::StateContext;
pub use dispatcher::{ActionCompletion, ActionStatus, Dispatcher};
pub use execution::{
    DispatchOutsideDomainStrategy, EnterStrategy, ExecutionStrategy, HostDomain, NoopDomain,
    NoopExecutionStrategy, Platform, SchedulingDomain,
};
pub use factory::{flatten_states, StateFactory, StatesAndDefaults};
pub use lifecycle::{LifecycleCoordinator, LifecyclePhase, LifecycleRegistry};
pub use plugin::{compose, plugin_fn, LoggerPlugin, Next, Plugin, PluginFn};
pub use state::{HandlerFn, HookFn, StateDefinition, StateNode};
pub use store::{Store, StoreBuilder};

pub use strata_core::{
    Action, ActionBatch, Result, StatePath, StateTree, StoreError, INIT_STATE, UPDATE_STATE,
};
