//! Waypoint partial rollback
//!
//! Decides how to respond to a failure and rolls back only what the failure
//! reaches.
//!
//! # Key Components
//!
//! - [`trigger`]: `(condition, scope) -> action` matrix with a fail-safe default
//! - [`RollbackExecutor`]: cascade resolution plus verified restore
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use waypoint_graph::DependencyGraph;
//! use waypoint_rollback::RollbackExecutor;
//! use waypoint_state::StateValue;
//! use waypoint_store::CheckpointStore;
//!
//! let executor = RollbackExecutor::new(
//!     Arc::new(CheckpointStore::default()),
//!     Arc::new(DependencyGraph::new()),
//! );
//! executor.register_dependency("test", "build").unwrap();
//! executor.register_dependency("build", "compile").unwrap();
//!
//! let state = StateValue::map().with("phase_id", "compile");
//! executor.create_checkpoint("exec-1", "compile", &state).unwrap();
//!
//! let result = executor.execute_rollback("phase", "compile", Some("exec-1"));
//! assert!(result.success);
//! assert_eq!(result.rolled_back_items, vec!["compile", "build", "test"]);
//! assert_eq!(result.restored_state, Some(state));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod executor;
pub mod trigger;

pub use error::RollbackError;
pub use executor::{RollbackExecutor, RollbackResult, TriggerEvent, TriggerResponse};
pub use trigger::{
    evaluate, lookup, Evaluation, RollbackAction, RollbackScope, RollbackTrigger, TriggerError,
    TRIGGER_MATRIX,
};

/// Common imports
pub mod prelude {
    pub use crate::{
        evaluate, Evaluation, RollbackAction, RollbackError, RollbackExecutor, RollbackResult,
        RollbackScope, RollbackTrigger, TriggerEvent, TriggerResponse,
    };
    pub use waypoint_graph::DependencyGraph;
    pub use waypoint_state::StateValue;
    pub use waypoint_store::{CheckpointId, CheckpointStore, StoreConfig};
}
