//! Error types for lander

use thiserror::Error;

/// Main error type for lander
#[derive(Error, Debug)]
pub enum LanderError {
    #[error("Malformed formula '{formula}': {reason}")]
    MalformedFormula { formula: String, reason: String },

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Definition mismatch: expected '{expected}', found '{found}'")]
    DefinitionMismatch { expected: String, found: String },

    #[error("Unknown definition: {0}")]
    UnknownDefinition(String),

    #[error("Table shape mismatch for '{name}': expected {expected}, found {found}")]
    TableShape {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Index {index} out of range for table of size {size}")]
    IndexOutOfRange { index: u64, size: u64 },

    #[error("Frozen: {0}")]
    Frozen(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LanderError {
    pub(crate) fn malformed(formula: &str, reason: impl Into<String>) -> Self {
        LanderError::MalformedFormula {
            formula: formula.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for lander operations
pub type Result<T> = std::result::Result<T, LanderError>;
