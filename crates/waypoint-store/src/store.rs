//! Checkpoint store
//!
//! Sole owner of checkpoint lifecycle: capture, compression, verified restore,
//! retention and expiry.
//!
//! # Concurrency
//!
//! Checkpoints are grouped per execution, each group behind its own mutex, so
//! operations on one execution serialise while different executions proceed
//! in parallel. Payload buffers are immutable and reference counted. A
//! restore takes a reference under the lock and verifies outside it, so
//! retention removing the checkpoint meanwhile cannot invalidate the read.

use crate::checkpoint::{compression_ratio, Checkpoint, CheckpointId, CheckpointStats, CheckpointStatus};
use crate::clock::{Clock, SystemClock};
use crate::codec::{self, Payload};
use crate::config::StoreConfig;
use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use waypoint_state::{Checksum, StateValue};

#[derive(Debug)]
struct StoredCheckpoint {
    meta: Checkpoint,
    /// Store-wide creation counter, breaks `created_at` ties
    sequence: u64,
    payload: Payload,
}

impl StoredCheckpoint {
    fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.meta.created_at, self.sequence)
    }

    fn borrow_for_restore(&self) -> RestoreSource {
        RestoreSource {
            id: self.meta.id,
            execution_id: self.meta.execution_id.clone(),
            phase_id: self.meta.phase_id.clone(),
            checksum: self.meta.checksum,
            payload: self.payload.clone(),
        }
    }
}

/// Everything a restore needs once the execution lock is released
#[derive(Debug)]
struct RestoreSource {
    id: CheckpointId,
    execution_id: String,
    phase_id: String,
    checksum: Checksum,
    payload: Payload,
}

/// Checkpoints of one execution
#[derive(Debug, Default)]
struct ExecutionSlot {
    checkpoints: Vec<StoredCheckpoint>,
    /// Set when the slot is unlinked from the store; writers must re-resolve
    retired: bool,
}

impl ExecutionSlot {
    fn find(&self, id: CheckpointId) -> Option<&StoredCheckpoint> {
        self.checkpoints.iter().find(|cp| cp.meta.id == id)
    }

    fn find_mut(&mut self, id: CheckpointId) -> Option<&mut StoredCheckpoint> {
        self.checkpoints.iter_mut().find(|cp| cp.meta.id == id)
    }

    fn latest_for_phase(&self, phase_id: &str) -> Option<&StoredCheckpoint> {
        self.checkpoints
            .iter()
            .filter(|cp| cp.meta.phase_id == phase_id)
            .max_by_key(|cp| cp.recency())
    }

    fn newest_first(&self) -> Vec<Checkpoint> {
        let mut ordered: Vec<&StoredCheckpoint> = self.checkpoints.iter().collect();
        ordered.sort_by(|a, b| b.recency().cmp(&a.recency()));
        ordered.into_iter().map(|cp| cp.meta.clone()).collect()
    }
}

type SlotRef = Arc<Mutex<ExecutionSlot>>;

/// In-memory checkpoint store
///
/// Construct once and share (`Arc<CheckpointStore>`) with every consumer.
#[derive(Debug)]
pub struct CheckpointStore {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    executions: DashMap<String, SlotRef>,
    /// Reverse index: checkpoint -> owning execution
    locations: DashMap<CheckpointId, String>,
    sequence: AtomicU64,
}

impl CheckpointStore {
    /// Create a store on the system clock
    ///
    /// # Errors
    /// Returns [`StoreError::Config`] if `config` fails
    /// [`StoreConfig::validate`].
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store on a custom clock
    ///
    /// # Errors
    /// See [`CheckpointStore::new`].
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(
            retention = config.retention_count,
            compression = config.compression_enabled,
            auto_cleanup = config.auto_cleanup,
            "checkpoint store initialized"
        );
        Self {
            config,
            clock,
            executions: DashMap::new(),
            locations: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Capture `state` for an execution phase
    ///
    /// The state is snapshotted into its canonical encoding immediately;
    /// later changes to the caller's value never reach the checkpoint.
    ///
    /// # Errors
    /// Fails if the state has no canonical encoding or compression fails.
    pub fn create_checkpoint(
        &self,
        execution_id: &str,
        phase_id: &str,
        state: &StateValue,
    ) -> Result<CheckpointId, StoreError> {
        self.create_checkpoint_with_metadata(execution_id, phase_id, state, BTreeMap::new())
    }

    /// Capture `state` with caller annotations
    ///
    /// # Errors
    /// See [`CheckpointStore::create_checkpoint`].
    pub fn create_checkpoint_with_metadata(
        &self,
        execution_id: &str,
        phase_id: &str,
        state: &StateValue,
        metadata: BTreeMap<String, String>,
    ) -> Result<CheckpointId, StoreError> {
        let canonical = state.canonical_bytes()?;
        let checksum = Checksum::compute(&canonical);
        let original_size = canonical.len() as u64;
        let id = CheckpointId::new();

        // Encode before taking the execution lock.
        let payload = if self.config.compression_enabled {
            let packed = codec::gzip(&canonical, self.config.compression_level)?;
            log_compression(id, original_size, packed.len() as u64);
            Payload::Gzip(Arc::from(packed))
        } else {
            Payload::Plain(Arc::from(canonical))
        };

        let removed = self.with_live_slot(execution_id, |slot| {
            let mut meta = Checkpoint {
                id,
                execution_id: execution_id.to_string(),
                phase_id: phase_id.to_string(),
                created_at: self.clock.now(),
                checksum,
                original_size,
                compressed: payload.is_compressed(),
                compressed_size: payload
                    .is_compressed()
                    .then(|| payload.stored_len() as u64),
                status: CheckpointStatus::Created,
                metadata,
            };
            if meta.compressed {
                meta.advance(CheckpointStatus::Compressed);
            }

            slot.checkpoints.push(StoredCheckpoint {
                meta,
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                payload,
            });
            self.locations.insert(id, execution_id.to_string());

            if self.config.auto_cleanup {
                self.retain_newest(slot, self.config.retention_count)
            } else {
                0
            }
        });

        tracing::info!(
            checkpoint_id = %id,
            execution_id,
            phase_id,
            size = original_size,
            "created checkpoint"
        );
        if removed > 0 {
            tracing::info!(
                execution_id,
                removed,
                kept = self.config.retention_count,
                "cleaned up old checkpoints"
            );
        }

        Ok(id)
    }

    /// Compress a checkpoint's payload
    ///
    /// Idempotent: an already-compressed checkpoint returns its stored size.
    ///
    /// # Errors
    /// Fails if the checkpoint is unknown or compression fails.
    pub fn compress(&self, id: CheckpointId) -> Result<u64, StoreError> {
        let slot = self.slot_for_checkpoint(id)?;
        let plain = {
            let guard = slot.lock();
            let cp = guard.find(id).ok_or(StoreError::CheckpointNotFound(id))?;
            match &cp.payload {
                Payload::Gzip(bytes) => {
                    tracing::debug!(checkpoint_id = %id, "checkpoint already compressed");
                    return Ok(bytes.len() as u64);
                }
                Payload::Plain(bytes) => Arc::clone(bytes),
            }
        };

        let packed = codec::gzip(&plain, self.config.compression_level)?;
        self.install_compressed(&slot, id, &plain, packed)
    }

    /// Compress every uncompressed checkpoint of an execution on the rayon pool
    ///
    /// Returns the total stored size of the checkpoints compressed by this call.
    ///
    /// # Errors
    /// Fails for an unknown execution or if compression fails.
    pub fn compress_execution(&self, execution_id: &str) -> Result<u64, StoreError> {
        let slot = self
            .slot(execution_id)
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.to_string()))?;

        let pending: Vec<(CheckpointId, Arc<[u8]>)> = slot
            .lock()
            .checkpoints
            .iter()
            .filter_map(|cp| match &cp.payload {
                Payload::Plain(bytes) => Some((cp.meta.id, Arc::clone(bytes))),
                Payload::Gzip(_) => None,
            })
            .collect();

        let level = self.config.compression_level;
        let packed: Vec<_> = pending
            .into_par_iter()
            .map(|(id, plain)| {
                let result = codec::gzip(&plain, level);
                (id, plain, result)
            })
            .collect();

        let mut total = 0;
        for (id, plain, result) in packed {
            match self.install_compressed(&slot, id, &plain, result?) {
                Ok(size) => total += size,
                Err(err) if err.is_not_found() => {
                    tracing::debug!(checkpoint_id = %id, "checkpoint removed before compression finished");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }

    /// Restore the state captured by a checkpoint
    ///
    /// The payload is decompressed if needed and its checksum recomputed
    /// before anything is decoded. Each call returns a freshly built tree.
    ///
    /// # Errors
    /// - [`StoreError::CheckpointNotFound`] for unknown or removed checkpoints
    /// - [`StoreError::IntegrityViolation`] / [`StoreError::CorruptPayload`]
    ///   when the stored data no longer verifies
    pub fn restore(&self, id: CheckpointId) -> Result<StateValue, StoreError> {
        let slot = self.slot_for_checkpoint(id)?;
        let source = slot
            .lock()
            .find(id)
            .map(StoredCheckpoint::borrow_for_restore)
            .ok_or(StoreError::CheckpointNotFound(id))?;
        self.finish_restore(&slot, &source)
    }

    /// Restore the most recent checkpoint of `phase_id` in an execution
    ///
    /// Lookup and payload borrow happen in one critical section. Returns
    /// `Ok(None)` when the execution has no checkpoint for that phase.
    ///
    /// # Errors
    /// Integrity failures as for [`CheckpointStore::restore`].
    pub fn restore_latest_for_phase(
        &self,
        execution_id: &str,
        phase_id: &str,
    ) -> Result<Option<(CheckpointId, StateValue)>, StoreError> {
        let Some(slot) = self.slot(execution_id) else {
            return Ok(None);
        };
        let found = slot
            .lock()
            .latest_for_phase(phase_id)
            .map(StoredCheckpoint::borrow_for_restore);

        match found {
            Some(source) => {
                let state = self.finish_restore(&slot, &source)?;
                Ok(Some((source.id, state)))
            }
            None => Ok(None),
        }
    }

    /// Most recent checkpoint of `phase_id` in an execution
    #[must_use]
    pub fn latest_for_phase(&self, execution_id: &str, phase_id: &str) -> Option<Checkpoint> {
        let slot = self.slot(execution_id)?;
        let guard = slot.lock();
        guard.latest_for_phase(phase_id).map(|cp| cp.meta.clone())
    }

    /// Checkpoints of an execution, newest first
    #[must_use]
    pub fn list_checkpoints(&self, execution_id: &str) -> Vec<Checkpoint> {
        self.slot(execution_id)
            .map(|slot| slot.lock().newest_first())
            .unwrap_or_default()
    }

    /// Metadata of a single checkpoint
    #[must_use]
    pub fn get_checkpoint(&self, id: CheckpointId) -> Option<Checkpoint> {
        let slot = self.slot_for_checkpoint(id).ok()?;
        let guard = slot.lock();
        guard.find(id).map(|cp| cp.meta.clone())
    }

    /// Number of active checkpoints for an execution
    #[must_use]
    pub fn checkpoint_count(&self, execution_id: &str) -> usize {
        self.slot(execution_id)
            .map_or(0, |slot| slot.lock().checkpoints.len())
    }

    /// Executions currently tracked, sorted
    #[must_use]
    pub fn execution_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.executions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Keep the `keep_count` most recent checkpoints of an execution
    ///
    /// Returns how many were removed; unknown executions remove nothing.
    pub fn cleanup_old_checkpoints(&self, execution_id: &str, keep_count: usize) -> usize {
        let Some(slot) = self.slot(execution_id) else {
            return 0;
        };
        let removed = {
            let mut guard = slot.lock();
            self.retain_newest(&mut guard, keep_count)
        };
        if removed > 0 {
            tracing::info!(
                execution_id,
                removed,
                kept = keep_count,
                "cleaned up old checkpoints"
            );
        }
        removed
    }

    /// Remove every checkpoint created before `now - max_age_days`
    ///
    /// Checkpoints exactly at the cutoff survive. Executions left without
    /// checkpoints stop being tracked. Returns how many were removed.
    pub fn cleanup_expired_checkpoints(&self, max_age_days: u32) -> usize {
        let Some(cutoff) = self
            .clock
            .now()
            .checked_sub_signed(Duration::days(i64::from(max_age_days)))
        else {
            // Cutoff predates the representable range: nothing is that old.
            tracing::debug!(max_age_days, "expiry cutoff out of range, nothing expired");
            return 0;
        };
        let slots: Vec<(String, SlotRef)> = self
            .executions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut removed = 0;
        for (execution_id, slot) in slots {
            let now_empty = {
                let mut guard = slot.lock();
                let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut guard.checkpoints)
                    .into_iter()
                    .partition(|cp| cp.meta.created_at < cutoff);
                guard.checkpoints = kept;

                for mut cp in expired {
                    cp.meta.advance(CheckpointStatus::Expired);
                    self.locations.remove(&cp.meta.id);
                    tracing::debug!(checkpoint_id = %cp.meta.id, execution_id = %execution_id, "expired checkpoint");
                    removed += 1;
                }
                guard.checkpoints.is_empty()
            };

            if now_empty {
                self.retire_if_empty(&execution_id);
            }
        }

        tracing::info!(removed, max_age_days, "cleaned up expired checkpoints");
        removed
    }

    /// Expiry sweep using the configured `max_age_days`
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_checkpoints(self.config.max_age_days)
    }

    /// Checkpoint statistics for an execution (zeroed when unknown)
    #[must_use]
    pub fn get_stats(&self, execution_id: &str) -> CheckpointStats {
        match self.slot(execution_id) {
            Some(slot) => {
                let guard = slot.lock();
                CheckpointStats::from_checkpoints(
                    execution_id,
                    guard.checkpoints.iter().map(|cp| &cp.meta),
                )
            }
            None => CheckpointStats::empty(execution_id),
        }
    }

    /// Remove a checkpoint regardless of retention
    ///
    /// Returns `false` if no such checkpoint is active.
    pub fn delete_checkpoint(&self, id: CheckpointId) -> bool {
        let Ok(slot) = self.slot_for_checkpoint(id) else {
            return false;
        };
        let mut guard = slot.lock();
        let Some(pos) = guard.checkpoints.iter().position(|cp| cp.meta.id == id) else {
            return false;
        };
        let mut cp = guard.checkpoints.remove(pos);
        cp.meta.advance(CheckpointStatus::Deleted);
        self.locations.remove(&id);
        tracing::info!(checkpoint_id = %id, "deleted checkpoint");
        true
    }

    fn slot(&self, execution_id: &str) -> Option<SlotRef> {
        self.executions
            .get(execution_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn slot_for_checkpoint(&self, id: CheckpointId) -> Result<SlotRef, StoreError> {
        let execution_id = self
            .locations
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::CheckpointNotFound(id))?;
        self.slot(&execution_id)
            .ok_or(StoreError::CheckpointNotFound(id))
    }

    /// Run `f` on the execution's slot, creating it if needed
    fn with_live_slot<R>(&self, execution_id: &str, f: impl FnOnce(&mut ExecutionSlot) -> R) -> R {
        loop {
            let slot = Arc::clone(
                self.executions
                    .entry(execution_id.to_string())
                    .or_default()
                    .value(),
            );
            let mut guard = slot.lock();
            // Lost a race with the expiry sweep; resolve a fresh slot.
            if guard.retired {
                continue;
            }
            return f(&mut guard);
        }
    }

    fn retire_if_empty(&self, execution_id: &str) {
        let retired = self
            .executions
            .remove_if(execution_id, |_, slot| {
                let mut guard = slot.lock();
                if guard.checkpoints.is_empty() {
                    guard.retired = true;
                    true
                } else {
                    false
                }
            })
            .is_some();
        if retired {
            tracing::debug!(execution_id, "execution no longer tracked");
        }
    }

    fn retain_newest(&self, slot: &mut ExecutionSlot, keep_count: usize) -> usize {
        if slot.checkpoints.len() <= keep_count {
            return 0;
        }
        slot.checkpoints.sort_by(|a, b| b.recency().cmp(&a.recency()));
        let removed = slot.checkpoints.split_off(keep_count);
        let count = removed.len();
        for mut cp in removed {
            cp.meta.advance(CheckpointStatus::Deleted);
            self.locations.remove(&cp.meta.id);
            tracing::debug!(
                checkpoint_id = %cp.meta.id,
                phase_id = %cp.meta.phase_id,
                "retention removed checkpoint"
            );
        }
        count
    }

    fn install_compressed(
        &self,
        slot: &SlotRef,
        id: CheckpointId,
        plain: &Arc<[u8]>,
        packed: Vec<u8>,
    ) -> Result<u64, StoreError> {
        let mut guard = slot.lock();
        let cp = guard.find_mut(id).ok_or(StoreError::CheckpointNotFound(id))?;

        if !cp.payload.ptr_eq(&Payload::Plain(Arc::clone(plain))) {
            // Another caller compressed it first.
            return Ok(cp.payload.stored_len() as u64);
        }

        let size = packed.len() as u64;
        cp.payload = Payload::Gzip(Arc::from(packed));
        cp.meta.compressed = true;
        cp.meta.compressed_size = Some(size);
        cp.meta.advance(CheckpointStatus::Compressed);
        log_compression(id, cp.meta.original_size, size);
        Ok(size)
    }

    fn finish_restore(&self, slot: &SlotRef, source: &RestoreSource) -> Result<StateValue, StoreError> {
        let state = verify_and_decode(source.id, &source.payload, source.checksum)?;

        // Gone if retention removed it while the payload was borrowed.
        let still_stored = match slot.lock().find_mut(source.id) {
            Some(cp) => {
                cp.meta.advance(CheckpointStatus::Restored);
                true
            }
            None => false,
        };
        tracing::info!(
            checkpoint_id = %source.id,
            execution_id = %source.execution_id,
            phase_id = %source.phase_id,
            still_stored,
            "restored checkpoint"
        );
        Ok(state)
    }

    /// Flip one byte of a stored payload
    ///
    /// Simulates storage corruption. Returns `false` for unknown checkpoints.
    #[cfg(any(test, feature = "test-util"))]
    pub fn corrupt_checkpoint(&self, id: CheckpointId) -> bool {
        let Ok(slot) = self.slot_for_checkpoint(id) else {
            return false;
        };
        let mut guard = slot.lock();
        match guard.find_mut(id) {
            Some(cp) => {
                cp.payload = cp.payload.tampered();
                true
            }
            None => false,
        }
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::build(StoreConfig::default(), Arc::new(SystemClock))
    }
}

fn verify_and_decode(
    id: CheckpointId,
    payload: &Payload,
    expected: Checksum,
) -> Result<StateValue, StoreError> {
    let canonical = payload.canonical_bytes().map_err(|e| {
        tracing::error!(checkpoint_id = %id, error = %e, "checkpoint payload failed to decompress");
        StoreError::CorruptPayload {
            id,
            reason: e.to_string(),
        }
    })?;

    let actual = Checksum::compute(&canonical);
    if actual != expected {
        tracing::error!(
            checkpoint_id = %id,
            expected = %expected.short(),
            actual = %actual.short(),
            "checksum verification failed"
        );
        return Err(StoreError::IntegrityViolation {
            id,
            expected,
            actual,
        });
    }

    StateValue::from_canonical_bytes(&canonical).map_err(|e| StoreError::CorruptPayload {
        id,
        reason: e.to_string(),
    })
}

fn log_compression(id: CheckpointId, original: u64, stored: u64) {
    tracing::info!(
        checkpoint_id = %id,
        original,
        compressed = stored,
        ratio = %format!("{:.1}%", compression_ratio(original, stored)),
        "compressed checkpoint"
    );
}
