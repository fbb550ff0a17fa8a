//! Peer Transport
//!
//! HTTP plumbing between server nodes. [`PeerClient`] wraps a shared
//! `reqwest::Client` with bounded per-request timeouts and exponential backoff
//! on connection failures; [`http::HttpPeerTransport`] maps the distro and raft
//! transport traits onto the internal endpoints.
//!
//! A peer that answers with an error status has its `{code, message}` body
//! turned back into a [`NamingError`], so a forwarded write fails the same way
//! it would have failed locally.

pub mod http;


use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::NamingError;

pub use http::HttpPeerTransport;

/// Set on proxied client requests so the receiving node never forwards again.
pub const FORWARDED_HEADER: &str = "x-naming-forwarded";

const INITIAL_BACKOFF_MS: u64 = 150;
const MAX_BACKOFF_MS: u64 = 1_200;

#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl PeerClient {
    pub fn new(timeout: Duration, attempts: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
        }
    }

    /// Same connection pool, different timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            http: self.http.clone(),
            timeout,
            attempts: self.attempts,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn post<T: Serialize>(&self, server: &str, path: &str, payload: &T) -> anyhow::Result<()> {
        let response = self.post_with_retry(url(server, path), payload).await?;
        check(response).await?;
        Ok(())
    }

    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        server: &str,
        path: &str,
        payload: &T,
    ) -> anyhow::Result<R> {
        let response = self.post_with_retry(url(server, path), payload).await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn get_json<R: DeserializeOwned>(&self, server: &str, path: &str) -> anyhow::Result<R> {
        let response = self.get_with_retry(url(server, path)).await?;
        Ok(check(response).await?.json().await?)
    }

    /// Replay a client request on another server and hand back its raw answer.
    pub async fn proxy(
        &self,
        server: &str,
        method: Method,
        path_and_query: &str,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> anyhow::Result<(u16, Vec<u8>)> {
        let mut request = self
            .http
            .request(method, url(server, path_and_query))
            .timeout(self.timeout)
            .header(FORWARDED_HEADER, "true")
            .body(body);
        if let Some(content_type) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        Ok((status, bytes.to_vec()))
    }

    // --- HTTP Helpers with Backoff ---

    async fn post_with_retry<T: Serialize>(&self, url: String, payload: &T) -> anyhow::Result<reqwest::Response> {
        let mut delay_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..self.attempts {
            let response = self
                .http
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(MAX_BACKOFF_MS);
                }
            }
        }

        Err(anyhow::anyhow!("retry attempts exhausted for {url}"))
    }

    async fn get_with_retry(&self, url: String) -> anyhow::Result<reqwest::Response> {
        let mut delay_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..self.attempts {
            let response = self.http.get(url.clone()).timeout(self.timeout).send().await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(MAX_BACKOFF_MS);
                }
            }
        }

        Err(anyhow::anyhow!("retry attempts exhausted for {url}"))
    }
}

pub(crate) fn url(server: &str, path: &str) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        format!("{server}{path}")
    } else {
        format!("http://{server}{path}")
    }
}

async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    Err(remote_error(status.as_u16(), &body).into())
}

/// Error a peer reported, decoded from its `{code, message}` body when present.
pub(crate) fn remote_error(status: u16, body: &[u8]) -> NamingError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        code: i32,
        message: String,
    }

    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => NamingError::from_code(parsed.code, parsed.message),
        Err(_) => NamingError::from_code(
            i32::from(status),
            format!("peer answered {status}: {}", String::from_utf8_lossy(body)),
        ),
    }
}
