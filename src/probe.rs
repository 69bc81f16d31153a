use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Method, Url};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid endpoint address `{address}`: {reason}")]
    InvalidUrl { address: String, reason: String },
    #[error("unsupported scheme `{0}`, only ws and wss endpoints can be probed")]
    InvalidScheme(String),
    #[error("probe request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRequest<K> {
    pub key: K,
    pub url: Url,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Maps a websocket endpoint to the http(s) URL answering its probe.
pub fn probe_url(ws_address: &str) -> Result<Url, ProbeError> {
    let mut url = Url::parse(ws_address).map_err(|error| ProbeError::InvalidUrl {
        address: ws_address.to_string(),
        reason: error.to_string(),
    })?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => return Err(ProbeError::InvalidScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|()| ProbeError::InvalidScheme(url.scheme().to_string()))?;
    Ok(url)
}

/// A probe resolves `Ok` on any HTTP reply, whatever its status code.
pub trait Prober: Send + Sync {
    fn probe(&self, url: Url) -> BoxFuture<'static, Result<(), ProbeError>>;
}

pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("wsrx-monitor/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }
}

impl Prober for HttpProber {
    fn probe(&self, url: Url) -> BoxFuture<'static, Result<(), ProbeError>> {
        let request = self.client.request(Method::OPTIONS, url);
        let timeout = self.timeout;
        Box::pin(async move {
            match tokio::time::timeout(timeout, request.send()).await {
                Ok(Ok(response)) => {
                    log::trace!(
                        "[probe] {} answered {}",
                        response.url(),
                        response.status()
                    );
                    Ok(())
                }
                Ok(Err(error)) if error.is_timeout() => Err(ProbeError::Timeout(timeout)),
                Ok(Err(error)) => Err(ProbeError::Transport(error)),
                Err(_) => Err(ProbeError::Timeout(timeout)),
            }
        })
    }
}

#[cfg(test)]
pub mod testing {
    use std::{
        collections::{HashMap, VecDeque},
        sync::Mutex,
    };

    use super::*;

    /// Replays scripted outcomes per URL; unscripted URLs fail with a timeout.
    #[derive(Default)]
    pub struct ScriptedProber {
        outcomes: Mutex<HashMap<String, VecDeque<bool>>>,
        pub probed: Mutex<Vec<String>>,
    }

    impl ScriptedProber {
        pub fn script(&self, url: &str, outcomes: &[bool]) {
            self.outcomes
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .extend(outcomes);
        }
    }

    impl Prober for ScriptedProber {
        fn probe(&self, url: Url) -> BoxFuture<'static, Result<(), ProbeError>> {
            self.probed.lock().unwrap().push(url.to_string());
            let success = self
                .outcomes
                .lock()
                .unwrap()
                .get_mut(url.as_str())
                .and_then(VecDeque::pop_front)
                .unwrap_or(false);
            Box::pin(async move {
                if success {
                    Ok(())
                } else {
                    Err(ProbeError::Timeout(Duration::from_millis(2000)))
                }
            })
        }
    }
}
