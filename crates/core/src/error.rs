//! Core error model.

use thiserror::Error;

/// Result type used by the core building blocks.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core-level error.
///
/// Only deterministic input failures live here; storage and transport
/// failures belong to the crates that own those concerns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was malformed (wrong length or alphabet).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
