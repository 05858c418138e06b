use thiserror::Error;

/// Errors surfaced by the store, the profile files and the providers.
///
/// `StoreUnavailable` and `MalformedResponse` are kept apart so callers can
/// tell a broken database from an LLM that answered in the wrong shape.
#[derive(Debug, Error)]
pub enum Error {
    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Provider(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
