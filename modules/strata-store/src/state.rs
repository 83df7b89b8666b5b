//! State definitions: the registration table that declares a state slice,
//! its defaults, its action handlers and its lifecycle hooks.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use strata_core::{Action, StatePath};

use crate::context::StateContext;

/// Action handler bound to a state node.
pub type HandlerFn =
    Arc<dyn Fn(StateContext, Action) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// `on_init` / `after_bootstrap` hook.
pub type HookFn = Arc<dyn Fn(StateContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Declares a state slice. Children are nested under this state's path.
///
/// ```ignore
/// let todos = StateDefinition::new("todos")
///     .defaults(json!({"items": []}))
///     .on("todos:add", |ctx, action| {
///         let mut items = ctx.get_state()["items"].clone();
///         items.as_array_mut().map(|a| a.push(action.payload));
///         ctx.patch_state(json!({"items": items}))?;
///         Ok(())
///     });
/// ```
pub struct StateDefinition {
    pub(crate) name: String,
    pub(crate) defaults: Value,
    pub(crate) handlers: Vec<(String, HandlerFn)>,
    pub(crate) on_init: Option<HookFn>,
    pub(crate) after_bootstrap: Option<HookFn>,
    pub(crate) children: Vec<StateDefinition>,
}

impl StateDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: Value::Object(Map::new()),
            handlers: Vec::new(),
            on_init: None,
            after_bootstrap: None,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    /// Bind a synchronous handler to `action_type`.
    pub fn on<F>(self, action_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StateContext, Action) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_async(action_type, move |ctx, action| {
            futures::future::ready(handler(ctx, action))
        })
    }

    /// Bind an asynchronous handler to `action_type`. A state may bind more
    /// than one handler to the same type; they run in declaration order.
    pub fn on_async<F, Fut>(mut self, action_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StateContext, Action) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |ctx, action| handler(ctx, action).boxed());
        self.handlers.push((action_type.into(), handler));
        self
    }

    pub fn on_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StateContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_init = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn after_bootstrap<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StateContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.after_bootstrap = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn child(mut self, child: StateDefinition) -> Self {
        self.children.push(child);
        self
    }
}

impl fmt::Debug for StateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDefinition")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .field(
                "handlers",
                &self.handlers.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
            )
            .field("children", &self.children)
            .finish()
    }
}

/// A registered, path-addressed state. Owned by the
/// [`StateFactory`](crate::factory::StateFactory).
pub struct StateNode {
    pub name: String,
    pub path: StatePath,
    pub defaults: Value,
    pub(crate) handlers: Vec<(String, HandlerFn)>,
    pub(crate) on_init: Option<HookFn>,
    pub(crate) after_bootstrap: Option<HookFn>,
}

impl StateNode {
    pub fn handles(&self, action_type: &str) -> bool {
        self.handlers.iter().any(|(t, _)| t == action_type)
    }

    pub(crate) fn handlers_for<'a>(
        &'a self,
        action_type: &'a str,
    ) -> impl Iterator<Item = &'a HandlerFn> {
        self.handlers
            .iter()
            .filter(move |(t, _)| t == action_type)
            .map(|(_, h)| h)
    }

    pub fn has_on_init(&self) -> bool {
        self.on_init.is_some()
    }

    pub fn has_after_bootstrap(&self) -> bool {
        self.after_bootstrap.is_some()
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("path", &self.path.to_string())
            .field("defaults", &self.defaults)
            .field("handlers", &self.handlers.len())
            .field("on_init", &self.has_on_init())
            .field("after_bootstrap", &self.has_after_bootstrap())
            .finish()
    }
}
