//! Error types for the checkpoint store
//!
//! Three classes matter to callers:
//! - not-found: unknown checkpoint id
//! - integrity: stored payload no longer matches its checksum
//! - invalid input: state without a canonical encoding, bad configuration

use crate::checkpoint::CheckpointId;
use waypoint_state::{Checksum, StateError};

/// Checkpoint store error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No active checkpoint with this id
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(CheckpointId),

    /// Execution has no checkpoints
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    /// Checksum recomputed on restore differs from the stored one
    #[error("integrity check failed for {id}: expected {expected}, computed {actual}")]
    IntegrityViolation {
        id: CheckpointId,
        expected: Checksum,
        actual: Checksum,
    },

    /// Stored payload could not be decoded at all
    #[error("corrupt payload for {id}: {reason}")]
    CorruptPayload { id: CheckpointId, reason: String },

    /// State cannot be captured
    #[error("invalid state: {0}")]
    InvalidState(#[from] StateError),

    /// Compression failed
    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Stored data failed verification
    ///
    /// Never downgrade these to warnings: the state they guard is unusable.
    #[inline]
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityViolation { .. } | Self::CorruptPayload { .. }
        )
    }

    /// Lookup of a checkpoint or execution failed
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CheckpointNotFound(_) | Self::ExecutionNotFound(_))
    }

    /// Checkpoint the error refers to, if any
    #[must_use]
    pub fn checkpoint_id(&self) -> Option<CheckpointId> {
        match self {
            Self::CheckpointNotFound(id)
            | Self::IntegrityViolation { id, .. }
            | Self::CorruptPayload { id, .. } => Some(*id),
            _ => None,
        }
    }
}
