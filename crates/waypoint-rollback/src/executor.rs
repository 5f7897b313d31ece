//! Rollback orchestration
//!
//! The executor owns no checkpoints. It resolves the cascade from the shared
//! [`DependencyGraph`], restores through the shared [`CheckpointStore`], and
//! reports what it did as a [`RollbackResult`].

use crate::error::RollbackError;
use crate::trigger::{evaluate, Evaluation, RollbackScope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use waypoint_graph::DependencyGraph;
use waypoint_state::StateValue;
use waypoint_store::{CheckpointId, CheckpointStore};

/// Outcome of one rollback request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    /// `None` when the requested scope was not recognised
    pub scope: Option<RollbackScope>,
    pub target_id: String,
    pub checkpoint_id: Option<CheckpointId>,
    pub message: String,
    /// Target first, then its dependents in cascade order
    pub rolled_back_items: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// State read back from the checkpoint, when one was restored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_state: Option<StateValue>,
}

impl RollbackResult {
    fn failed(
        scope: Option<RollbackScope>,
        target_id: &str,
        checkpoint_id: Option<CheckpointId>,
        message: String,
        rolled_back_items: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            scope,
            target_id: target_id.to_string(),
            checkpoint_id,
            message,
            rolled_back_items,
            timestamp: Utc::now(),
            restored_state: None,
        }
    }
}

/// Failure report from the surrounding engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub condition: String,
    pub scope: String,
    pub target: String,
    #[serde(default)]
    pub execution_id: Option<String>,
}

impl TriggerEvent {
    #[must_use]
    pub fn new(
        condition: impl Into<String>,
        scope: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            scope: scope.into(),
            target: target.into(),
            execution_id: None,
        }
    }

    #[must_use]
    pub fn for_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }
}

/// Decision plus, when the decision called for one, the rollback performed
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerResponse {
    pub evaluation: Evaluation,
    pub rollback: Option<RollbackResult>,
}

/// Partial rollback executor
#[derive(Debug, Clone)]
pub struct RollbackExecutor {
    store: Arc<CheckpointStore>,
    graph: Arc<DependencyGraph>,
}

impl RollbackExecutor {
    #[must_use]
    pub fn new(store: Arc<CheckpointStore>, graph: Arc<DependencyGraph>) -> Self {
        Self { store, graph }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Record that `source` depends on `target`
    ///
    /// # Errors
    /// Propagates [`waypoint_graph::GraphError`].
    pub fn register_dependency(&self, source: &str, target: &str) -> Result<bool, RollbackError> {
        Ok(self.graph.register_dependency(source, target)?)
    }

    /// Checkpoint a phase through the shared store
    ///
    /// # Errors
    /// Propagates [`waypoint_store::StoreError`].
    pub fn create_checkpoint(
        &self,
        execution_id: &str,
        phase_id: &str,
        state: &StateValue,
    ) -> Result<CheckpointId, RollbackError> {
        Ok(self.store.create_checkpoint(execution_id, phase_id, state)?)
    }

    /// Retention through the shared store
    pub fn cleanup_old_checkpoints(&self, execution_id: &str, keep_count: usize) -> usize {
        self.store.cleanup_old_checkpoints(execution_id, keep_count)
    }

    #[must_use]
    pub fn checkpoint_count(&self, execution_id: &str) -> usize {
        self.store.checkpoint_count(execution_id)
    }

    /// Roll back `target` and everything that depends on it
    ///
    /// An unrecognised `scope` fails without side effects.
    #[must_use]
    pub fn execute_rollback(
        &self,
        scope: &str,
        target: &str,
        execution_id: Option<&str>,
    ) -> RollbackResult {
        match scope.parse::<RollbackScope>() {
            Ok(scope) => self.execute(scope, target, execution_id),
            Err(err) => {
                tracing::warn!(scope, target, "rejected rollback request: {err}");
                RollbackResult::failed(None, target, None, err.to_string(), Vec::new())
            }
        }
    }

    /// Typed form of [`RollbackExecutor::execute_rollback`]
    ///
    /// When `execution_id` is given, the most recent checkpoint of `target`
    /// in that execution is restored. Without one the cascade is still
    /// reported; a checkpoint that fails verification fails the rollback.
    #[must_use]
    pub fn execute(
        &self,
        scope: RollbackScope,
        target: &str,
        execution_id: Option<&str>,
    ) -> RollbackResult {
        tracing::info!(%scope, target, execution_id, "executing rollback");

        let mut rolled_back_items = vec![target.to_string()];
        rolled_back_items.extend(self.graph.find_dependents(target));

        let restored = match execution_id {
            Some(execution_id) => self.store.restore_latest_for_phase(execution_id, target),
            None => Ok(None),
        };

        let (checkpoint_id, restored_state) = match restored {
            Ok(Some((id, state))) => (Some(id), Some(state)),
            Ok(None) => {
                if execution_id.is_some() {
                    tracing::warn!(target, execution_id, "no checkpoint found for rollback target");
                }
                (None, None)
            }
            Err(err) => {
                tracing::error!(target, execution_id, error = %err, "rollback restore failed");
                return RollbackResult::failed(
                    Some(scope),
                    target,
                    err.checkpoint_id(),
                    format!("Rollback of {target} failed: {err}"),
                    rolled_back_items,
                );
            }
        };

        tracing::info!(
            target,
            items = rolled_back_items.len(),
            checkpoint_id = ?checkpoint_id.map(|id| id.to_string()),
            "rollback complete"
        );

        RollbackResult {
            success: true,
            scope: Some(scope),
            target_id: target.to_string(),
            checkpoint_id,
            message: format!("Successfully rolled back {} items", rolled_back_items.len()),
            rolled_back_items,
            timestamp: Utc::now(),
            restored_state,
        }
    }

    /// Restore a specific checkpoint, no cascade
    #[must_use]
    pub fn restore_from_checkpoint(&self, checkpoint_id: CheckpointId) -> RollbackResult {
        let Some(meta) = self.store.get_checkpoint(checkpoint_id) else {
            return RollbackResult::failed(
                Some(RollbackScope::Phase),
                "",
                Some(checkpoint_id),
                format!("Checkpoint not found: {checkpoint_id}"),
                Vec::new(),
            );
        };

        match self.store.restore(checkpoint_id) {
            Ok(state) => RollbackResult {
                success: true,
                scope: Some(RollbackScope::Phase),
                target_id: meta.phase_id.clone(),
                checkpoint_id: Some(checkpoint_id),
                message: format!("Restored from checkpoint: {checkpoint_id}"),
                rolled_back_items: vec![meta.phase_id],
                timestamp: Utc::now(),
                restored_state: Some(state),
            },
            Err(err) => {
                tracing::error!(%checkpoint_id, error = %err, "checkpoint restore failed");
                RollbackResult::failed(
                    Some(RollbackScope::Phase),
                    &meta.phase_id,
                    Some(checkpoint_id),
                    err.to_string(),
                    Vec::new(),
                )
            }
        }
    }

    /// Evaluate a trigger and carry out the rollback it calls for
    ///
    /// An unrecognised scope widens to the whole execution.
    #[must_use]
    pub fn respond(&self, event: &TriggerEvent) -> TriggerResponse {
        let evaluation = evaluate(&event.condition, &event.scope);

        let rollback = evaluation.action.requires_rollback().then(|| {
            let scope = evaluation.scope.unwrap_or(RollbackScope::EntireExecution);
            self.execute(scope, &event.target, event.execution_id.as_deref())
        });

        TriggerResponse {
            evaluation,
            rollback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::RollbackAction;
    use waypoint_store::StoreConfig;

    fn executor() -> RollbackExecutor {
        RollbackExecutor::new(
            Arc::new(CheckpointStore::new(StoreConfig::new()).unwrap()),
            Arc::new(DependencyGraph::new()),
        )
    }

    fn state(phase: &str) -> StateValue {
        StateValue::map().with("phase_id", phase).with("status", "completed")
    }

    #[test]
    fn cascade_order() {
        let exec = executor();
        exec.register_dependency("test", "build").unwrap();
        exec.register_dependency("build", "compile").unwrap();

        let result = exec.execute_rollback("phase", "compile", None);
        assert!(result.success);
        assert_eq!(result.scope, Some(RollbackScope::Phase));
        assert_eq!(result.rolled_back_items, vec!["compile", "build", "test"]);
        assert_eq!(result.checkpoint_id, None);
        assert_eq!(result.message, "Successfully rolled back 3 items");
    }

    #[test]
    fn invalid_scope_has_no_side_effects() {
        let exec = executor();
        let id = exec.create_checkpoint("exec-1", "compile", &state("compile")).unwrap();

        let result = exec.execute_rollback("galaxy", "compile", Some("exec-1"));
        assert!(!result.success);
        assert_eq!(result.scope, None);
        assert!(result.message.contains("invalid rollback scope"));
        assert!(result.rolled_back_items.is_empty());

        let meta = exec.store().get_checkpoint(id).unwrap();
        assert_ne!(meta.status, waypoint_store::CheckpointStatus::Restored);
    }

    #[test]
    fn restores_latest_checkpoint_of_target() {
        let exec = executor();
        exec.create_checkpoint("exec-1", "compile", &state("compile")).unwrap();
        let latest = exec
            .create_checkpoint("exec-1", "compile", &state("compile").with("attempt", 2))
            .unwrap();

        let result = exec.execute_rollback("phase", "compile", Some("exec-1"));
        assert!(result.success);
        assert_eq!(result.checkpoint_id, Some(latest));
        assert_eq!(
            result.restored_state.unwrap().get("attempt"),
            Some(&StateValue::Int(2))
        );
    }

    #[test]
    fn missing_checkpoint_still_reports_cascade() {
        let exec = executor();
        exec.register_dependency("build", "compile").unwrap();
        let result = exec.execute_rollback("plan-unit", "compile", Some("exec-unknown"));
        assert!(result.success);
        assert_eq!(result.checkpoint_id, None);
        assert_eq!(result.rolled_back_items, vec!["compile", "build"]);
    }

    #[test]
    fn restore_by_id() {
        let exec = executor();
        let id = exec.create_checkpoint("exec-1", "build", &state("build")).unwrap();

        let result = exec.restore_from_checkpoint(id);
        assert!(result.success);
        assert_eq!(result.target_id, "build");
        assert_eq!(result.restored_state, Some(state("build")));

        let missing = exec.restore_from_checkpoint(CheckpointId::new());
        assert!(!missing.success);
        assert!(missing.message.starts_with("Checkpoint not found"));
    }

    #[test]
    fn respond_skips_rollback_for_soft_actions() {
        let exec = executor();
        let response = exec.respond(&TriggerEvent::new("validation-failure", "artifact", "lib.o"));
        assert_eq!(response.evaluation.action, RollbackAction::SkipAndContinue);
        assert!(response.rollback.is_none());

        let response = exec.respond(&TriggerEvent::new("resource-exhaustion", "phase", "compile"));
        assert_eq!(response.evaluation.action, RollbackAction::RescheduleWithBackoff);
        assert!(response.rollback.is_none());
    }

    #[test]
    fn respond_widens_unknown_scope() {
        let exec = executor();
        let response = exec.respond(&TriggerEvent::new("security-violation", "galaxy", "compile"));
        assert!(response.evaluation.fail_safe);
        let rollback = response.rollback.unwrap();
        assert_eq!(rollback.scope, Some(RollbackScope::EntireExecution));
        assert!(rollback.success);
    }

    #[test]
    fn result_serializes_with_wire_names() {
        let exec = executor();
        let result = exec.execute_rollback("plan-unit", "unit-7", None);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["scope"], "plan-unit");
        assert_eq!(json["rolled_back_items"][0], "unit-7");
        assert!(json.get("restored_state").is_none());
    }
}
