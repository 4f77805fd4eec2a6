//! Feed credential acquisition.
//!
//! Credentials are short-lived and may rotate between reconnects, so the
//! connection manager fetches them fresh on every attempt. The provider
//! is injected as a trait object to allow test doubles.

use crate::error::{WsError, WsResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Header carrying the anti-forgery token on credential requests.
const CSRF_HEADER: &str = "X-CSRF-Token";

/// Default timeout for credential requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to open and authenticate one transport session.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Short-lived transport URL.
    pub ws_url: String,
    /// Streaming authentication token.
    pub api_key: String,
}

/// Source of feed credentials, fetched fresh per connect attempt.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> WsResult<Credentials>;
}

/// REST endpoints involved in the credential flow.
#[derive(Debug, Clone)]
pub struct CredentialEndpoints {
    /// Issues the anti-forgery token required by the other two.
    pub antiforgery_url: String,
    /// Issues the short-lived transport URL.
    pub transport_url: String,
    /// Issues the streaming authentication token.
    pub token_url: String,
}

#[derive(Debug, Deserialize)]
struct AntiForgeryResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TransportConfigResponse {
    ws_url: String,
}

#[derive(Debug, Deserialize)]
struct StreamTokenResponse {
    token: String,
}

/// Credential provider backed by the dashboard's REST endpoints.
pub struct HttpCredentialProvider {
    client: Client,
    endpoints: CredentialEndpoints,
}

impl HttpCredentialProvider {
    pub fn new(endpoints: CredentialEndpoints) -> WsResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| WsError::CredentialFetch(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, endpoints })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        csrf: Option<&str>,
    ) -> WsResult<T> {
        let mut request = self.client.get(url);
        if let Some(token) = csrf {
            request = request.header(CSRF_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WsError::CredentialFetch(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WsError::CredentialFetch(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| WsError::CredentialFetch(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> WsResult<Credentials> {
        let csrf: AntiForgeryResponse = self.get_json(&self.endpoints.antiforgery_url, None).await?;

        let transport: TransportConfigResponse = self
            .get_json(&self.endpoints.transport_url, Some(&csrf.token))
            .await?;
        let stream: StreamTokenResponse = self
            .get_json(&self.endpoints.token_url, Some(&csrf.token))
            .await?;

        debug!(ws_url = %transport.ws_url, "Fetched fresh feed credentials");
        Ok(Credentials {
            ws_url: transport.ws_url,
            api_key: stream.token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shapes() {
        let csrf: AntiForgeryResponse = serde_json::from_str(r#"{"token": "csrf123"}"#).unwrap();
        assert_eq!(csrf.token, "csrf123");

        let transport: TransportConfigResponse =
            serde_json::from_str(r#"{"ws_url": "wss://feed.example/stream"}"#).unwrap();
        assert_eq!(transport.ws_url, "wss://feed.example/stream");

        let token: StreamTokenResponse = serde_json::from_str(r#"{"token": "tok456"}"#).unwrap();
        assert_eq!(token.token, "tok456");
    }
}
