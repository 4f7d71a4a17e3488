// src/error.rs

//! Error types for version negotiation and dependency resolution

use crate::config::ConfigError;
use crate::resolver::Conflict;
use thiserror::Error;

/// Errors produced by the resolution engine
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed version string or range expression
    #[error("Format error: {0}")]
    FormatError(String),

    /// No tier can supply a required package
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Incompatible requirements or a dependency cycle
    #[error("Dependency conflict: {0}")]
    Conflict(#[from] Conflict),

    /// Content checksum changed while propagating between tiers
    #[error("Integrity check failed for {artifact}: expected {expected}, got {actual}")]
    IntegrityError {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// Remote tier unreachable or refused the request
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Initialization error: {0}")]
    InitError(String),
}

impl Error {
    /// True when the error came from an unreachable remote tier
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportError(_))
    }
}

/// Result type for resolution operations
pub type Result<T> = std::result::Result<T, Error>;
