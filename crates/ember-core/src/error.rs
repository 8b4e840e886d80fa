//! Error types for Ember Core.

use crate::config::ConfigError;
use ember_abstraction::{SecretError, StorageError};
use ember_training::TrainingError;
use thiserror::Error;

/// Core error type for Ember operations.
#[derive(Error, Debug)]
pub enum EmberError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Secret resolution errors
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Dataset, training and artifact errors
    #[error(transparent)]
    Training(#[from] TrainingError),
}

/// Result type alias for Ember operations.
pub type Result<T> = std::result::Result<T, EmberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_conversion() {
        let err: EmberError = StorageError::NotFound("fire_dataset.zip".to_string()).into();
        match err {
            EmberError::Storage(StorageError::NotFound(key)) => assert_eq!(key, "fire_dataset.zip"),
            other => panic!("Expected Storage error variant, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_keys_display() {
        let err: EmberError = ConfigError::Missing(vec!["key_vault_name", "container_name"]).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required configuration keys: key_vault_name, container_name"
        );
    }
}
