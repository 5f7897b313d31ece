//! Testing utilities for the Waypoint workspace
//!
//! Shared fixtures: representative execution states, stores on a manual
//! clock, and executors wired to a phase pipeline.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use std::sync::Arc;
use waypoint_graph::DependencyGraph;
use waypoint_rollback::RollbackExecutor;
use waypoint_state::StateValue;
use waypoint_store::{CheckpointStore, ManualClock, StoreConfig};

/// Phases of the standard pipeline, each depending on the previous one
pub const PIPELINE: [&str; 4] = ["compile", "build", "test", "deploy"];

/// Fixed start time for clock-driven tests
pub fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Execution state as captured at the end of a phase
pub fn sample_state(phase_id: &str) -> StateValue {
    StateValue::map()
        .with("phase_id", phase_id)
        .with("status", "running")
        .with(
            "data",
            StateValue::map().with("key1", "value1").with("key2", "value2"),
        )
        .with("artifacts", vec![format!("{phase_id}.out")])
        .with("metrics", StateValue::map().with("duration_ms", 1250).with("ratio", 0.75))
}

/// State large and repetitive enough to compress well
pub fn bulky_state(phase_id: &str, lines: usize) -> StateValue {
    let log: Vec<String> = (0..lines)
        .map(|i| format!("[{phase_id}] step {i}: ok"))
        .collect();
    sample_state(phase_id).with("log", log)
}

/// Store on a manual clock frozen at [`epoch`]
pub fn manual_store(config: StoreConfig) -> (Arc<CheckpointStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let store = Arc::new(CheckpointStore::with_clock(config, clock.clone()).unwrap());
    (store, clock)
}

/// Executor with [`PIPELINE`] registered as a dependency chain
pub fn pipeline_executor(config: StoreConfig) -> RollbackExecutor {
    let executor = RollbackExecutor::new(
        Arc::new(CheckpointStore::new(config).unwrap()),
        Arc::new(DependencyGraph::new()),
    );
    register_pipeline(&executor);
    executor
}

/// Register each [`PIPELINE`] phase as depending on its predecessor
pub fn register_pipeline(executor: &RollbackExecutor) {
    for pair in PIPELINE.windows(2) {
        executor.register_dependency(pair[1], pair[0]).unwrap();
    }
}

/// Checkpoint every pipeline phase of an execution, in order
pub fn checkpoint_pipeline(executor: &RollbackExecutor, execution_id: &str) {
    for phase in PIPELINE {
        executor
            .create_checkpoint(execution_id, phase, &sample_state(phase))
            .unwrap();
    }
}
