/// Dependency graph error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Node names must be non-empty
    #[error("dependency node name must not be empty")]
    EmptyName,
}
