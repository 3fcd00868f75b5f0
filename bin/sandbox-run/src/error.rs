use alloy_primitives::hex::FromHexError;
use contract_sandbox::SandboxError;

/// Error types for the sandbox-run command
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to read file
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Invalid hex string
    #[error("Invalid hex string: {0}")]
    InvalidHex(#[from] FromHexError),

    /// Invalid JSON in a config or prestate file, or a report that failed to encode
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The sandbox rejected or aborted the call
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Failed to install the log subscriber
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for the sandbox-run command
pub type Result<T> = std::result::Result<T, Error>;
