//! Error types for otter-mock

use thiserror::Error;

/// Mocking layer error type.
///
/// Payloads are plain strings so a failed evaluation can be handed to every
/// waiter of the same in-flight future.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MockError {
    /// The specifier could not be resolved to a module on disk
    #[error("Cannot find module '{specifier}' imported from '{importer}'")]
    NotFound { specifier: String, importer: String },

    /// Resolution failed for a reason other than a missing file
    #[error("Resolution error: {0}")]
    Resolve(String),

    /// A mock declaration cannot be moved above the module's imports
    #[error("{file}:{line}:{column}: {message}")]
    Hoist {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    /// A mock factory failed while producing its module
    #[error("Mock factory for '{module}' failed: {message}")]
    Factory { module: String, message: String },

    /// A package manifest exists but is not valid JSON
    #[error("Invalid package manifest at '{path}': {message}")]
    Manifest { path: String, message: String },

    /// The host evaluator failed to run a module
    #[error("Failed to evaluate '{module}': {message}")]
    Evaluation { module: String, message: String },

    /// A stub was configured to throw
    #[error("Uncaught {0}")]
    Thrown(String),

    /// Configuration file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MockError {
    /// Create a module-not-found error
    pub fn not_found(specifier: impl Into<String>, importer: impl Into<String>) -> Self {
        Self::NotFound {
            specifier: specifier.into(),
            importer: importer.into(),
        }
    }

    /// Create a factory error
    pub fn factory(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Factory {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error means the target module does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for MockError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type using MockError
pub type MockResult<T> = Result<T, MockError>;
