use crate::bootstrap::BootstrapError;
use crate::secrets::{ProvisionError, StoreError};
use thiserror::Error;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required secrets: {}", .0.join(", "))]
    MissingSecrets(Vec<String>),
}

impl AppError {
    /// Process exit code for CLI commands.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 78,
            Self::MissingSecrets(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
