use crate::backend::BackendError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Raised only after both the lossless trim and the lossy compression
    /// pass failed to make the blob fit. The in-memory record survives; only
    /// durability is lost.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<BackendError> for StoreError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::QuotaExceeded { .. } => StoreError::QuotaExceeded(e.to_string()),
            BackendError::Io(msg) => StoreError::Backend(msg),
        }
    }
}
