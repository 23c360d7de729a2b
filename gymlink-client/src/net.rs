use async_trait::async_trait;

use crate::{
    api::{ApiRequest, ApiResponse, Transport, TransportError},
    ClientConfig,
};

fn transport_error(e: reqwest::Error) -> TransportError {
    match e.is_timeout() {
        true => TransportError::Timeout,
        false => TransportError::Network(e.to_string()),
    }
}

/// HTTP transport keeping the session cookies between requests
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    pub fn new(config: ClientConfig) -> Result<ReqwestTransport, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout())
            .build()
            .map_err(transport_error)?;
        Ok(ReqwestTransport { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(req.method.clone(), self.config.url(&req.path));
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        tracing::trace!(method = %req.method, path = %req.path, retried = req.retried, "sending request");
        let resp = builder.send().await.map_err(transport_error)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(transport_error)?;
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}
