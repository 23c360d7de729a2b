use crate::api::{self, TransportError};

/// Why a session refresh did not renew the credentials
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RefreshFailure {
    #[error("refresh was rejected with status {0}")]
    Rejected(http::StatusCode),

    #[error("refresh could not reach the server: {0}")]
    Transport(TransportError),

    #[error("refresh was abandoned before it settled")]
    Abandoned,
}

/// Errors returned to callers of the client
///
/// This is `Clone` so that a single refresh outcome can be handed to every
/// request that was waiting on it.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] api::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("request was rejected as unauthenticated")]
    Unauthorized,

    #[error("session expired: {0}")]
    SessionExpired(RefreshFailure),

    #[error("failed to encode request body: {0}")]
    Encode(String),

    #[error("failed to decode server response: {0}")]
    Decode(String),
}

impl Error {
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Unauthorized | Error::SessionExpired(_))
    }
}
