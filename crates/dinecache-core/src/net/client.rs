//! The fetch primitive and its `reqwest` implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{NetworkError, Request, Response};

/// Something that can answer a request.
///
/// Like a browser `fetch`, any HTTP status is a successful fetch; only
/// transport failures are errors. Use [`fetch_ok`] to treat non-2xx as
/// failures too.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError>;
}

/// Fetch and fail on any non-success status.
pub async fn fetch_ok(network: &dyn Network, request: Request) -> Result<Response, NetworkError> {
    let url = request.url.to_string();
    let response = network.fetch(request).await?;
    if response.is_success() {
        Ok(response)
    } else {
        Err(NetworkError::from_status(&url, response.status, &response.text_body()))
    }
}

/// Network access over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "Fetched"
        );

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

/// Value for the `Accept` header of API requests.
pub(crate) const ACCEPT_JSON: (&str, &str) = ("accept", "application/json");
