use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{Channel, FeedEvent};

#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: http::Method,
    pub path: String,
    pub body: Option<serde_json::Value>,

    /// Set once the request has been replayed after a session refresh
    pub retried: bool,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> ApiRequest {
        ApiRequest {
            method: http::Method::GET,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn post(path: impl Into<String>) -> ApiRequest {
        ApiRequest {
            method: http::Method::POST,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn with_json<B: serde::Serialize>(mut self, body: &B) -> serde_json::Result<ApiRequest> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiResponse {
    pub status: http::StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: http::StatusCode, body: Vec<u8>) -> ApiResponse {
        ApiResponse { status, body }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network failure: {0}")]
    Network(String),
}

/// Sends requests to the server, carrying the session credentials implicitly
///
/// Any HTTP status is a successful transport-level exchange: only failing to
/// get an answer at all is a `TransportError`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Opens push channels
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn open(&self, channel: &Channel)
        -> Result<BoxStream<'static, FeedEvent>, TransportError>;
}
