use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum GirderError {
    StoreError(String),
    TransactionError(String),
    ValidationError(String),
    NotFoundError(String),
    InvalidStateError(String),
    UnknownWorkflow(String),
    ConfigurationError(String),
}

impl fmt::Display for GirderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GirderError::StoreError(msg) => write!(f, "Store error: {msg}"),
            GirderError::TransactionError(msg) => write!(f, "Transaction error: {msg}"),
            GirderError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            GirderError::NotFoundError(msg) => write!(f, "Not found: {msg}"),
            GirderError::InvalidStateError(msg) => write!(f, "Invalid state: {msg}"),
            GirderError::UnknownWorkflow(name) => write!(f, "Unknown workflow: {name}"),
            GirderError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for GirderError {}

pub type Result<T> = std::result::Result<T, GirderError>;
