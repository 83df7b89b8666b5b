//! Domain-agnostic building blocks for the strata state container.
//!
//! Holds the immutable state tree, the path type used to address it, the
//! action value object and the shared error type. Zero knowledge of plugins,
//! dispatching or scheduling.

pub mod action;
pub mod error;
pub mod path;
pub mod tree;

pub use action::{Action, ActionBatch, INIT_STATE, UPDATE_STATE};
pub use error::{Result, StoreError};
pub use path::StatePath;
pub use tree::StateTree;
