use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode, Url, header};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid scheme in `{0}`, only ws and wss are supported")]
    InvalidScheme(String),
    #[error("invalid control api address: {0}")]
    InvalidUrl(String),
    #[error("control api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("control api returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct LaunchRequest<'a> {
    direction: &'a str,
    from: &'a str,
    to: &'a str,
}

#[derive(Serialize)]
struct CloseRequest<'a> {
    key: &'a str,
}

/// Client for the daemon's local control API at `http://127.0.0.1:<port>/`.
#[derive(Clone)]
pub struct ControlApi {
    client: reqwest::Client,
    root: Url,
    secret: Option<String>,
}

impl ControlApi {
    pub fn new(port: u16, secret: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let root = Url::parse(&format!("http://127.0.0.1:{port}/"))
            .map_err(|error| ApiError::InvalidUrl(error.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("wsrx-monitor/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            root,
            secret,
        })
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    fn service(&self, method: Method, name: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .root
            .join(name)
            .map_err(|error| ApiError::InvalidUrl(error.to_string()))?;
        let mut request = self.client.request(method, url);
        if let Some(secret) = &self.secret {
            request = request.header(header::AUTHORIZATION, secret);
        }
        Ok(request)
    }

    fn with_json<T: Serialize>(request: RequestBuilder, body: &T) -> Result<RequestBuilder, ApiError> {
        Ok(request
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?))
    }

    async fn send(request: RequestBuilder) -> Result<Vec<u8>, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                body: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }
        Ok(body)
    }

    pub async fn fetch_pool(&self) -> Result<Vec<u8>, ApiError> {
        Self::send(self.service(Method::GET, "pool")?).await
    }

    /// Asks the daemon to bind `from` and relay it to the websocket `to`.
    /// Returns the daemon's description of the created tunnel.
    pub async fn launch(&self, from: &str, to: &str) -> Result<Vec<u8>, ApiError> {
        if !(to.starts_with("ws://") || to.starts_with("wss://")) {
            return Err(ApiError::InvalidScheme(to.to_string()));
        }
        let body = LaunchRequest {
            direction: "tcp2ws",
            from,
            to,
        };
        Self::send(Self::with_json(self.service(Method::POST, "pool")?, &body)?).await
    }

    pub async fn close(&self, key: &str) -> Result<(), ApiError> {
        let request = Self::with_json(self.service(Method::DELETE, "pool")?, &CloseRequest { key })?;
        Self::send(request).await.map(|_| ())
    }

    pub async fn heartbeat(&self) -> Result<(), ApiError> {
        Self::send(self.service(Method::GET, "heartbeat")?)
            .await
            .map(|_| ())
    }

    pub async fn fetch_access(&self) -> Result<Vec<u8>, ApiError> {
        Self::send(self.service(Method::GET, "access")?).await
    }

    pub async fn allow(&self, domain: &str) -> Result<(), ApiError> {
        let request = Self::with_json(self.service(Method::POST, "access")?, &domain)?;
        Self::send(request).await.map(|_| ())
    }

    pub async fn deny(&self, domain: &str) -> Result<(), ApiError> {
        let request = Self::with_json(self.service(Method::DELETE, "access")?, &domain)?;
        Self::send(request).await.map(|_| ())
    }
}
