//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("query placeholder mismatch in {fragment:?}: expected {expected} parameters, got {actual}")]
    QueryArity {
        fragment: String,
        expected: usize,
        actual: usize,
    },

    #[error("query parameter without a preceding fragment at position {0}")]
    DanglingParam(usize),

    #[error("unknown facility: {0}")]
    UnknownFacility(String),

    #[error("invalid facility configuration: {0}")]
    InvalidFacility(String),

    #[error("not an entity record: {0}")]
    NotAnEntity(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
