//! Service error taxonomy
//!
//! Only `InvalidRequest` and `StoreUnavailable` surface as request failures.
//! `AuxiliaryCheckFailed` and `PayloadParse` are absorbed and logged by the
//! sign-in flow; sign-in succeeds or fails on credentials alone.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A required request parameter is missing or empty
    #[error("{0}")]
    InvalidRequest(String),

    /// The backing record store or face index failed a read or write
    #[error("record store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),

    /// The match-checker invocation failed
    #[error("match check failed: {0}")]
    AuxiliaryCheckFailed(String),

    /// A collaborator returned a payload that could not be parsed
    #[error("malformed payload: {0}")]
    PayloadParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
