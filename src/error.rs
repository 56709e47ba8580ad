//! Error types for toolhost-mcp.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors that can occur inside the session store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The session directory could not be created or accessed.
    #[error("failed to access session directory: {path}")]
    Directory {
        /// The session directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A session file could not be read or written.
    #[error("failed to persist session {session}")]
    Io {
        /// The session id.
        session: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialised.
    #[error("failed to encode session {session}")]
    Encode {
        /// The session id.
        session: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A session with this id already exists on disk.
    #[error("session {session} already exists")]
    AlreadyExists {
        /// The session id.
        session: String,
    },
}
