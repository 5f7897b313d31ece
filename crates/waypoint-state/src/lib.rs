//! Waypoint state model
//!
//! Serialization-neutral execution state with a canonical encoding and
//! integrity digests.
//!
//! # Core Concepts
//!
//! - [`StateValue`]: owned tree of maps, sequences and scalars
//! - [`StateValue::deep_clone`]: explicit recursive copy, shares nothing
//! - [`StateValue::canonical_bytes`]: deterministic encoding (sorted keys)
//! - [`Checksum`]: SHA-256 over the canonical encoding
//!
//! # Example
//!
//! ```rust
//! use waypoint_state::{Checksum, StateValue};
//!
//! let state = StateValue::map()
//!     .with("phase_id", "compile")
//!     .with("artifacts", vec!["lib.o", "main.o"]);
//!
//! let sum = Checksum::of_state(&state).unwrap();
//! assert!(sum.matches(&state.canonical_bytes().unwrap()));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod checksum;
mod value;

pub use checksum::{Checksum, ChecksumError};
pub use value::{StateError, StateValue};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
