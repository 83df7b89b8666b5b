use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid state name '{0}': names may only contain letters, digits and underscores")]
    InvalidStateName(String),

    #[error("State path '{path}' is already registered")]
    DuplicateStatePath { path: String },

    #[error("Cannot patch state at '{path}': {reason}")]
    InvalidPatch { path: String, reason: String },

    #[error("Handler for '{action_type}' on state '{path}' failed: {source}")]
    Handler {
        action_type: String,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Lifecycle hook '{hook}' on state '{path}' failed: {source}")]
    Hook {
        hook: &'static str,
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Plugin error: {0}")]
    Plugin(anyhow::Error),

    #[error("Execution strategy returned without running the work")]
    WorkNotRun,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl StoreError {
    /// Configuration errors are raised at registration time and are never
    /// retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidStateName(_)
                | StoreError::DuplicateStatePath { .. }
                | StoreError::Config(_)
        )
    }

    /// Recover a `StoreError` that travelled through a plugin chain as an
    /// `anyhow::Error`. Anything else is attributed to the plugin.
    pub fn from_chain(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(store_err) => store_err,
            Err(other) => StoreError::Plugin(other),
        }
    }
}
