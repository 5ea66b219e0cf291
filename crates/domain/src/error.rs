use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("Permission denied")]
    PermissionDenied,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Precondition(String),
    #[error("conflict")]
    Conflict,
    #[error("upstream call failed: {0}")]
    Upstream(String),
}
