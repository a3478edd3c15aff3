use thiserror::Error;

#[derive(Error, Debug)]
pub enum SDataError {
    #[error("Invalid query shape: {message}")]
    InvalidQueryShape { message: String },

    #[error("The binary operator '{0}' is not supported")]
    UnsupportedOperator(String),

    #[error("The member '{0}' is not supported")]
    UnsupportedMember(String),

    #[error("The constant '{0}' is not supported")]
    UnsupportedConstant(String),

    #[error("Evaluation failed: {message}")]
    EvaluationFailed { message: String },

    #[error("Unknown resource kind: {0}")]
    UnknownResourceKind(String),

    #[error("Ambiguous type for resource kind {kind}: {reason}")]
    AmbiguousType { kind: String, reason: String },

    #[error("Format error in field '{field}': cannot convert {raw} to {expected}")]
    Format {
        field: String,
        raw: String,
        expected: String,
    },

    #[error("Concurrency conflict ({status}): {body}")]
    ConcurrencyConflict { status: u16, body: String },

    #[error("Transport error ({status}): {body}")]
    Transport { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Cannot {operation} an entity in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

pub type SDataResult<T> = Result<T, SDataError>;

impl SDataError {
    pub(crate) fn shape(message: impl Into<String>) -> Self {
        SDataError::InvalidQueryShape {
            message: message.into(),
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        SDataError::EvaluationFailed {
            message: message.into(),
        }
    }

    /// Classifies a non-success response from a mutating request.
    ///
    /// A rejected `If-Match` precondition comes back as 412; some servers use
    /// 409 for the same stale-version case.
    pub fn from_mutation_status(status: u16, body: String) -> Self {
        match status {
            409 | 412 => SDataError::ConcurrencyConflict { status, body },
            _ => SDataError::Transport { status, body },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SDataError::ConcurrencyConflict { .. })
    }
}
