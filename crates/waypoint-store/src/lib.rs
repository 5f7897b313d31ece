//! Waypoint checkpoint store
//!
//! Captures execution state at phase boundaries so a failed phase can be
//! rolled back without restarting the whole execution.
//!
//! # Guarantees
//!
//! - A checkpoint is an independent snapshot; later mutation of the source
//!   state never reaches it
//! - Every restore recomputes the SHA-256 checksum of the canonical encoding
//!   and refuses data that does not match
//! - Compression is transparent to restore
//! - At most `retention_count` checkpoints per execution when automatic
//!   retention is on
//!
//! # Example
//!
//! ```rust
//! use waypoint_state::StateValue;
//! use waypoint_store::{CheckpointStore, StoreConfig};
//!
//! let store = CheckpointStore::new(StoreConfig::new().with_retention(3)).unwrap();
//! let state = StateValue::map().with("phase_id", "compile").with("status", "running");
//!
//! let id = store.create_checkpoint("exec-1", "compile", &state).unwrap();
//! assert_eq!(store.restore(id).unwrap(), state);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod checkpoint;
mod clock;
mod codec;
mod config;
mod error;
mod store;

pub use checkpoint::{compression_ratio, Checkpoint, CheckpointId, CheckpointStats, CheckpointStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use error::StoreError;
pub use store::CheckpointStore;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
