//! Simulation runs
//!
//! Each simulated execution checkpoints a linear phase pipeline, then rolls
//! back its middle phase. Everything it gets back is checked against what
//! that execution (and no other) wrote.

use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use waypoint_graph::DependencyGraph;
use waypoint_rollback::{RollbackError, RollbackExecutor};
use waypoint_state::StateValue;
use waypoint_store::{CheckpointStats, CheckpointStore, StoreConfig};

pub(crate) fn phase_name(index: usize) -> String {
    format!("phase-{index}")
}

/// Executor whose graph chains `phase-i` onto `phase-(i-1)`
pub(crate) fn build_executor(
    config: StoreConfig,
    phases: usize,
) -> Result<RollbackExecutor, RollbackError> {
    let executor = RollbackExecutor::new(
        Arc::new(CheckpointStore::new(config)?),
        Arc::new(DependencyGraph::new()),
    );
    for i in 1..phases {
        executor.register_dependency(&phase_name(i), &phase_name(i - 1))?;
    }
    Ok(executor)
}

fn phase_state(execution_id: &str, phase: usize) -> StateValue {
    let artifacts: Vec<String> = (0..8)
        .map(|a| format!("{execution_id}/{}/artifact-{a}", phase_name(phase)))
        .collect();
    StateValue::map()
        .with("execution_id", execution_id)
        .with("phase_id", phase_name(phase))
        .with("step", phase as i64)
        .with("artifacts", artifacts)
}

#[derive(Debug, Default)]
struct ExecutionOutcome {
    created: usize,
    restored: bool,
    violations: Vec<String>,
}

fn run_execution(
    executor: &RollbackExecutor,
    execution_id: &str,
    phases: usize,
) -> Result<ExecutionOutcome, RollbackError> {
    let mut outcome = ExecutionOutcome::default();
    for phase in 0..phases {
        executor.create_checkpoint(execution_id, &phase_name(phase), &phase_state(execution_id, phase))?;
        outcome.created += 1;
    }

    let target_index = phases / 2;
    let target = phase_name(target_index);
    let result = executor.execute_rollback("phase", &target, Some(execution_id));

    if !result.success {
        outcome
            .violations
            .push(format!("{execution_id}: rollback of {target} failed: {}", result.message));
    }

    let expected_items: Vec<String> = (target_index..phases).map(phase_name).collect();
    if result.rolled_back_items != expected_items {
        outcome.violations.push(format!(
            "{execution_id}: cascade {:?}, expected {expected_items:?}",
            result.rolled_back_items
        ));
    }

    if let Some(state) = &result.restored_state {
        outcome.restored = true;
        if *state != phase_state(execution_id, target_index) {
            outcome
                .violations
                .push(format!("{execution_id}: restored state does not match what was written"));
        }
    }

    let config = executor.store().config();
    let expected_count = if config.auto_cleanup {
        phases.min(config.retention_count)
    } else {
        phases
    };
    let count = executor.checkpoint_count(execution_id);
    if count != expected_count {
        outcome.violations.push(format!(
            "{execution_id}: {count} checkpoints retained, expected {expected_count}"
        ));
    }

    Ok(outcome)
}

#[derive(Debug, Serialize)]
pub(crate) struct StressReport {
    pub(crate) executions: usize,
    pub(crate) phases: usize,
    pub(crate) checkpoints_created: usize,
    pub(crate) rollbacks_restored: usize,
    pub(crate) rollbacks_without_checkpoint: usize,
    pub(crate) expired: usize,
    pub(crate) violations: Vec<String>,
    pub(crate) elapsed_ms: u128,
}

impl StressReport {
    pub(crate) fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub(crate) fn generate_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Stress Report:");
        let _ = writeln!(out, "  Executions: {}", self.executions);
        let _ = writeln!(out, "  Phases: {}", self.phases);
        let _ = writeln!(out, "  Checkpoints Created: {}", self.checkpoints_created);
        let _ = writeln!(out, "  Rollbacks Restored: {}", self.rollbacks_restored);
        let _ = writeln!(out, "  Rollbacks Without Checkpoint: {}", self.rollbacks_without_checkpoint);
        let _ = writeln!(out, "  Expired: {}", self.expired);
        let _ = writeln!(out, "  Elapsed: {}ms", self.elapsed_ms);
        let _ = writeln!(out, "  Violations: {}", self.violations.len());
        for violation in &self.violations {
            let _ = writeln!(out, "    - {violation}");
        }
        let _ = write!(out, "  Status: {}", if self.passed() { "PASSED" } else { "FAILED" });
        out
    }
}

/// Run `executions` concurrent executions on the blocking pool
pub(crate) async fn run_stress(
    config: StoreConfig,
    executions: usize,
    phases: usize,
) -> anyhow::Result<StressReport> {
    let started = Instant::now();
    let executor = Arc::new(build_executor(config, phases)?);

    let handles: Vec<_> = (0..executions)
        .map(|n| {
            let executor = Arc::clone(&executor);
            tokio::task::spawn_blocking(move || {
                let execution_id = format!("exec-{n}");
                run_execution(&executor, &execution_id, phases)
            })
        })
        .collect();

    let mut report = StressReport {
        executions,
        phases,
        checkpoints_created: 0,
        rollbacks_restored: 0,
        rollbacks_without_checkpoint: 0,
        expired: 0,
        violations: Vec::new(),
        elapsed_ms: 0,
    };

    for handle in handles {
        let outcome = handle.await??;
        report.checkpoints_created += outcome.created;
        if outcome.restored {
            report.rollbacks_restored += 1;
        } else {
            report.rollbacks_without_checkpoint += 1;
        }
        report.violations.extend(outcome.violations);
    }

    let tracked = executor.store().execution_ids().len();
    if tracked != executions {
        report
            .violations
            .push(format!("{tracked} executions tracked, expected {executions}"));
    }

    report.expired = executor.store().cleanup_expired();
    report.elapsed_ms = started.elapsed().as_millis();

    tracing::info!(
        executions,
        phases,
        violations = report.violations.len(),
        elapsed_ms = report.elapsed_ms as u64,
        "stress run finished"
    );
    Ok(report)
}

/// Deterministic single-threaded run, stats per execution
pub(crate) fn seeded_stats(
    config: StoreConfig,
    executions: usize,
    phases: usize,
) -> Result<Vec<CheckpointStats>, RollbackError> {
    let executor = build_executor(config, phases)?;
    let store = executor.store();

    (0..executions)
        .map(|n| -> Result<CheckpointStats, RollbackError> {
            let execution_id = format!("exec-{n}");
            for phase in 0..phases {
                executor.create_checkpoint(&execution_id, &phase_name(phase), &phase_state(&execution_id, phase))?;
            }
            store.compress_execution(&execution_id)?;
            Ok(store.get_stats(&execution_id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn stress_passes() {
        let report = run_stress(StoreConfig::new().with_retention(10), 16, 6)
            .await
            .unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.checkpoints_created, 96);
        assert_eq!(report.rollbacks_restored, 16);
    }

    #[tokio::test]
    async fn tight_retention_rolls_back_without_checkpoint() {
        // phase-2 of 6 falls outside the newest two
        let report = run_stress(StoreConfig::new().with_retention(2), 8, 6)
            .await
            .unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.rollbacks_without_checkpoint, 8);
    }

    #[test]
    fn seeded_stats_cover_every_execution() {
        let stats = seeded_stats(StoreConfig::new().with_compression(false), 3, 4).unwrap();
        assert_eq!(stats.len(), 3);
        for (n, s) in stats.iter().enumerate() {
            assert_eq!(s.execution_id, format!("exec-{n}"));
            assert_eq!(s.total_checkpoints, 4);
            assert_eq!(s.compressed_checkpoints, 4);
        }
    }

    #[test]
    fn report_text_marks_failures() {
        let report = StressReport {
            executions: 1,
            phases: 1,
            checkpoints_created: 1,
            rollbacks_restored: 0,
            rollbacks_without_checkpoint: 1,
            expired: 0,
            violations: vec!["exec-0: lost".to_string()],
            elapsed_ms: 3,
        };
        let text = report.generate_text();
        assert!(text.contains("Status: FAILED"));
        assert!(text.contains("exec-0: lost"));
    }
}
