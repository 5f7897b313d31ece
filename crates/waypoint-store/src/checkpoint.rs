//! Checkpoint identity, lifecycle and metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;
use waypoint_state::Checksum;

/// Unique checkpoint identifier (ULID for sortability)
///
/// Rendered as `cp_<ulid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointId(pub Ulid);

impl CheckpointId {
    const PREFIX: &'static str = "cp_";

    /// Generate new checkpoint ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for CheckpointId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(Self::PREFIX).unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}

impl Serialize for CheckpointId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CheckpointId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle status of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointStatus {
    /// Captured, payload stored uncompressed
    Created,
    /// Payload stored compressed
    Compressed,
    /// Read back by a restore
    Restored,
    /// Removed by the age-based sweep
    Expired,
    /// Removed by retention or explicit deletion
    Deleted,
}

impl CheckpointStatus {
    /// Statuses reachable from `self` in one step
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [CheckpointStatus] {
        use CheckpointStatus::*;
        match self {
            Created => &[Compressed, Restored, Expired, Deleted],
            Compressed => &[Restored, Expired, Deleted],
            Restored => &[Restored, Expired, Deleted],
            Expired | Deleted => &[],
        }
    }

    /// Whether `self -> to` is a legal transition
    #[inline]
    #[must_use]
    pub fn can_transition_to(self, to: CheckpointStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Checkpoint has left the active list
    #[inline]
    #[must_use]
    pub const fn is_removed(self) -> bool {
        matches!(self, Self::Expired | Self::Deleted)
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Compressed => "compressed",
            Self::Restored => "restored",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Checkpoint metadata
///
/// This is what the store hands out for listings and lookups. The captured
/// state itself is only reachable through a restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub execution_id: String,
    pub phase_id: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over the canonical encoding, computed before compression
    pub checksum: Checksum,
    /// Length of the canonical encoding in bytes
    pub original_size: u64,
    pub compressed: bool,
    /// Stored length when compressed
    pub compressed_size: Option<u64>,
    pub status: CheckpointStatus,
    /// Caller-supplied annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Checkpoint {
    /// Apply a status transition if the lifecycle allows it
    ///
    /// Returns `false` (and leaves the status untouched) otherwise.
    pub(crate) fn advance(&mut self, to: CheckpointStatus) -> bool {
        if self.status.can_transition_to(to) {
            self.status = to;
            true
        } else {
            tracing::debug!(
                checkpoint_id = %self.id,
                from = %self.status,
                to = %to,
                "ignoring status transition"
            );
            false
        }
    }

    /// Space saved by compression, as a percentage of `original_size`
    #[must_use]
    pub fn compression_ratio(&self) -> Option<f64> {
        self.compressed_size
            .map(|stored| compression_ratio(self.original_size, stored))
    }
}

/// Percentage of `original` saved by storing `stored` bytes instead
#[must_use]
pub fn compression_ratio(original: u64, stored: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - stored as f64 / original as f64) * 100.0
}

/// Per-execution checkpoint statistics
///
/// Unknown or empty executions report zeroes rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub execution_id: String,
    pub total_checkpoints: usize,
    pub compressed_checkpoints: usize,
    /// Sum of `original_size` over all checkpoints
    pub total_size: u64,
    /// Sum of `compressed_size` over compressed checkpoints
    pub compressed_size: u64,
    /// Space saved across compressed checkpoints, in percent
    pub compression_ratio: f64,
    pub oldest_checkpoint: Option<DateTime<Utc>>,
    pub newest_checkpoint: Option<DateTime<Utc>>,
}

impl CheckpointStats {
    /// Zeroed statistics
    #[must_use]
    pub fn empty(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            total_checkpoints: 0,
            compressed_checkpoints: 0,
            total_size: 0,
            compressed_size: 0,
            compression_ratio: 0.0,
            oldest_checkpoint: None,
            newest_checkpoint: None,
        }
    }

    pub(crate) fn from_checkpoints<'a>(
        execution_id: &str,
        checkpoints: impl Iterator<Item = &'a Checkpoint>,
    ) -> Self {
        let mut stats = Self::empty(execution_id);
        let mut compressed_original = 0u64;

        for cp in checkpoints {
            stats.total_checkpoints += 1;
            stats.total_size += cp.original_size;
            if let Some(stored) = cp.compressed_size {
                stats.compressed_checkpoints += 1;
                stats.compressed_size += stored;
                compressed_original += cp.original_size;
            }
            stats.oldest_checkpoint = Some(
                stats
                    .oldest_checkpoint
                    .map_or(cp.created_at, |t| t.min(cp.created_at)),
            );
            stats.newest_checkpoint = Some(
                stats
                    .newest_checkpoint
                    .map_or(cp.created_at, |t| t.max(cp.created_at)),
            );
        }

        stats.compression_ratio = compression_ratio(compressed_original, stats.compressed_size);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_id_display_and_parse() {
        let id = CheckpointId::new();
        let s = id.to_string();
        assert!(s.starts_with("cp_"));
        assert_eq!(s.parse::<CheckpointId>().unwrap(), id);
        assert_eq!(id.0.to_string().parse::<CheckpointId>().unwrap(), id);
    }

    #[test]
    fn checkpoint_id_rejects_garbage() {
        assert!("cp_not-a-ulid".parse::<CheckpointId>().is_err());
    }

    #[test]
    fn checkpoint_ids_are_unique() {
        let a = CheckpointId::new();
        let b = CheckpointId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn created_transitions() {
        use CheckpointStatus::*;
        assert!(Created.can_transition_to(Compressed));
        assert!(Created.can_transition_to(Restored));
        assert!(Created.can_transition_to(Deleted));
        assert!(!Created.can_transition_to(Created));
    }

    #[test]
    fn removed_statuses_are_terminal() {
        use CheckpointStatus::*;
        for terminal in [Expired, Deleted] {
            assert!(terminal.allowed_transitions().is_empty());
            assert!(terminal.is_removed());
        }
        assert!(!Restored.can_transition_to(Compressed));
        assert!(Restored.can_transition_to(Restored));
    }

    #[test]
    fn ratio_of_empty_payload_is_zero() {
        assert_eq!(compression_ratio(0, 0), 0.0);
        assert!((compression_ratio(200, 50) - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&CheckpointStatus::Compressed).unwrap();
        assert_eq!(json, "\"compressed\"");
    }
}
