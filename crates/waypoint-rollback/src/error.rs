use waypoint_graph::GraphError;
use waypoint_store::StoreError;

/// Rollback executor error
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
