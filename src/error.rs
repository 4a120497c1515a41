use thiserror::Error;

/// Failure of a single holder lookup.
///
/// Kept `Clone` so the last failure can sit inside published tracker snapshots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request never produced a usable HTTP response
    #[error("transport failure: {0}")]
    Transport(String),

    /// The provider (or the lookup itself) rejected the request parameters
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The provider answered with a JSON-RPC error object
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    /// The response body could not be decoded
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::MalformedResponse(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::MalformedResponse(err.to_string())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerError {
    #[error("holder tracker has shut down")]
    Closed,
}
