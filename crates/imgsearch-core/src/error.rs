use thiserror::Error;

/// Error taxonomy shared by every library crate in the workspace.
///
/// The enum is `Clone` because a single failed model load is reported to
/// every caller that was waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to load model: {0}")]
    Load(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Vector backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Model {0} was evicted while in use")]
    Evicted(String),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Unknown model id.
    pub fn unknown_model(model_id: &str) -> Self {
        Self::NotFound(format!("unknown model: {model_id}"))
    }

    /// Vector length does not match the model's dimension.
    pub fn dimension_mismatch(model_id: &str, expected: usize, got: usize) -> Self {
        Self::Rejected(format!(
            "vector for {model_id} has {got} dimensions, expected {expected}"
        ))
    }

    /// A later call may succeed without any change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Load(_) | Self::BackendUnavailable(_) | Self::Evicted(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
