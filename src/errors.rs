use thiserror::Error;

/// Error type for atomgraph operations.
#[derive(Debug, Error)]
pub enum AtomGraphError {
    #[error("schema error: {0}")]
    SchemaError(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("id space exhausted after {attempts} attempts")]
    IdSpaceExhausted { attempts: u32 },
    #[error("engine error during {operation}: {message}")]
    Engine {
        operation: &'static str,
        message: String,
    },
    #[error("transaction error: {0}")]
    TransactionError(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("codec error: {0}")]
    Codec(String),
}

impl AtomGraphError {
    pub fn schema<T: Into<String>>(msg: T) -> Self {
        AtomGraphError::SchemaError(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        AtomGraphError::NotFound(msg.into())
    }

    pub fn already_exists<T: Into<String>>(msg: T) -> Self {
        AtomGraphError::AlreadyExists(msg.into())
    }

    pub fn engine<T: ToString>(operation: &'static str, cause: T) -> Self {
        AtomGraphError::Engine {
            operation,
            message: cause.to_string(),
        }
    }

    pub fn transaction<T: Into<String>>(msg: T) -> Self {
        AtomGraphError::TransactionError(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        AtomGraphError::InvalidInput(msg.into())
    }

    pub fn codec<T: Into<String>>(msg: T) -> Self {
        AtomGraphError::Codec(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AtomGraphError::NotFound(_))
    }
}
