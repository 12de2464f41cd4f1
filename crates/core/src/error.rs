#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Staging failed: {0}")]
    Staging(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
