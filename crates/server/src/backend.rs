//! HTTP implementation of the AI backend collaborator.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use std::time::Duration;
use tollgate_core::{
    backend::{AiBackend, AiRequest, UpstreamError},
    config::UpstreamConfig,
};
use tracing::{debug, error};

/// Longest upstream error body echoed into an [`UpstreamError::Status`] message.
const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Serialize)]
struct UpstreamPayload<'a> {
    content: &'a str,
    model: &'a str,
}

/// Forwards AI requests as `POST {base_url}/{operation}` with a JSON body.
///
/// The whole call, connect through body, is bounded by the configured timeout and reported as
/// [`UpstreamError::Timeout`] when exceeded. Successful responses must be valid JSON.
pub struct HttpAiBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl HttpAiBackend {
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("tollgate/", env!("CARGO_PKG_VERSION")))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                error!(error = %e, "failed to build http client");
                UpstreamError::Transport(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        Self::new(
            config.url.clone(),
            config.api_key.clone(),
            config.default_model.clone(),
            config.timeout(),
        )
    }

    fn endpoint(&self, request: &AiRequest) -> String {
        format!("{}/{}", self.base_url, request.operation.as_str())
    }
}

/// Maps transport failures without leaking addresses or TLS details into responses.
fn sanitize_network_error(error: &reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        return UpstreamError::Timeout;
    }
    let reason = if error.is_connect() {
        "connection refused or unreachable"
    } else if error.is_body() || error.is_decode() {
        "response body error"
    } else if error.is_redirect() {
        "unexpected redirect"
    } else {
        "network error"
    };
    UpstreamError::Transport(reason.to_string())
}

#[async_trait]
impl AiBackend for HttpAiBackend {
    async fn invoke(&self, request: &AiRequest) -> Result<Bytes, UpstreamError> {
        let payload = UpstreamPayload {
            content: &request.content,
            model: request.target_model.as_deref().unwrap_or(&self.default_model),
        };

        let mut call = self.client.post(self.endpoint(request)).json(&payload);
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key);
        }

        let response = call.send().await.map_err(|e| sanitize_network_error(&e))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                status = status.as_u16(),
                operation = %request.operation,
                "upstream rejected call"
            );
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body = response.bytes().await.map_err(|e| sanitize_network_error(&e))?;
        serde_json::from_slice::<serde::de::IgnoredAny>(&body)
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        Ok(body)
    }
}
