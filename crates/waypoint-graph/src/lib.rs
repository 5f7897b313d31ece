//! Waypoint dependency graph
//!
//! Records "source depends on target" between named phases, plan units and
//! artifacts, and answers which items a rollback of one of them cascades to.
//!
//! The graph knows nothing about executions. Use [`namespaced`] to keep the
//! nodes of concurrent executions apart.
//!
//! ```rust
//! use waypoint_graph::DependencyGraph;
//!
//! let graph = DependencyGraph::new();
//! graph.register_dependency("test", "build").unwrap();
//! graph.register_dependency("build", "compile").unwrap();
//! assert_eq!(graph.find_dependents("compile"), vec!["build", "test"]);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod graph;

pub use error::GraphError;
pub use graph::{namespaced, DependencyGraph};
