//! HTTP AI service mock.
//!
//! Wraps mockito so tests can exercise [`server::HttpAiBackend`] end to end.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// Upstream key the mocks expect as a bearer token.
pub const UPSTREAM_API_KEY: &str = "upstream-test-key";

pub struct UpstreamMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl UpstreamMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Base URL to configure as `upstream.url`.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Mocks a successful `operation` call for `content`, expected exactly `hits` times.
    pub async fn mock_success(
        &mut self,
        operation: &str,
        content: &str,
        response: &Value,
        hits: usize,
    ) -> &mut Self {
        let mock = self
            .server
            .mock("POST", format!("/{operation}").as_str())
            .match_header("authorization", format!("Bearer {UPSTREAM_API_KEY}").as_str())
            .match_body(Matcher::PartialJson(json!({ "content": content })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(response.to_string())
            .expect(hits)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks `operation` failing with `status`, expected exactly `hits` times.
    pub async fn mock_failure(&mut self, operation: &str, status: usize, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", format!("/{operation}").as_str())
            .with_status(status)
            .with_body("upstream unavailable")
            .expect(hits)
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Asserts every registered mock was hit the expected number of times.
    pub async fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }
}
