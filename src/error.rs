//! Error types for tmc

use thiserror::Error;

/// Result type for tmc operations
pub type Result<T> = std::result::Result<T, TmError>;

/// tmc error types
#[derive(Error, Debug)]
pub enum TmError {
    #[error("Database server not registered: {server}")]
    ServerLookup { server: String },

    #[error("No database server is registered with the TM server")]
    NoServerRegistered,

    #[error("Server selection failed: {reason}")]
    ServerSelection { reason: String },

    #[error("Container {path} already exists on database server {server}")]
    DuplicateContainer { server: String, path: String },

    #[error("Failed to create container {path} on database server {server}: {reason}")]
    RemoteCreate {
        server: String,
        path: String,
        reason: String,
    },

    #[error("Container {path} was not found on database server {server} after creation")]
    CreationVerification { server: String, path: String },

    #[error("Container not found: {path}")]
    ContainerNotFound { path: String },

    #[error("Remote {operation} failed: {message}")]
    RemoteCommunication { operation: String, message: String },

    #[error("Remote {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Server session is no longer valid")]
    SessionInvalid,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
