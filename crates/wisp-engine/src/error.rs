use wisp_core::errors::ProviderError;
use wisp_store::StoreError;

use crate::config::ConfigError;
use crate::validate::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Fatal errors propagate to the caller; everything else folds into a
    /// renderable turn result.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_fatal(),
            Self::Internal(_) => true,
            Self::Store(_) | Self::Config(_) | Self::Validation(_) => false,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.error_kind(),
            Self::Store(_) => "store_error",
            Self::Config(_) => "configuration_error",
            Self::Validation(_) => "validation_error",
            Self::Internal(_) => "internal_error",
        }
    }
}
