//! # Error Types
//!
//! Custom error types for FieldCam using `thiserror`.
//!
//! Every component returns these typed errors; the per-cycle orchestrator in
//! `main.rs` decides at each call site whether a failure is fatal (it almost
//! never is) or gets logged and recorded in the cycle's telemetry.

use thiserror::Error;

/// Main error type for FieldCam
#[derive(Debug, Error)]
pub enum FieldcamError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote file store protocol errors
    #[error("Store error: {0}")]
    Store(#[from] suppaftp::FtpError),

    /// Operation attempted without an established store session
    #[error("Store is not connected")]
    StoreUnavailable,

    /// Settings/telemetry document (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Power controller command errors (unparseable or rejected output)
    #[error("Controller error: {0}")]
    Controller(String),
}

/// Result type alias for FieldCam
pub type Result<T> = std::result::Result<T, FieldcamError>;
