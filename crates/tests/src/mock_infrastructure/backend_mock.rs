//! In-process AI backend.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::watch;
use tollgate_core::backend::{AiBackend, AiRequest, UpstreamError};

/// Replies `{"operation": ..., "echo": <content>}` unless told to fail.
///
/// A gated backend counts the call, then parks it until [`release`](Self::release).
pub struct MockBackend {
    calls: AtomicUsize,
    fail_with: Option<UpstreamError>,
    gate: watch::Sender<bool>,
}

impl MockBackend {
    fn build(fail_with: Option<UpstreamError>, open: bool) -> Arc<Self> {
        let (gate, _) = watch::channel(open);
        Arc::new(Self { calls: AtomicUsize::new(0), fail_with, gate })
    }

    #[must_use]
    pub fn ok() -> Arc<Self> {
        Self::build(None, true)
    }

    #[must_use]
    pub fn failing(err: UpstreamError) -> Arc<Self> {
        Self::build(Some(err), true)
    }

    #[must_use]
    pub fn gated() -> Arc<Self> {
        Self::build(None, false)
    }

    /// Lets parked and future calls through.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Yields until at least `n` calls have started.
    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::task::yield_now().await;
        }
    }

    #[must_use]
    pub fn expected_body(request: &AiRequest) -> Bytes {
        Bytes::from(
            json!({ "operation": request.operation.as_str(), "echo": request.content }).to_string(),
        )
    }
}

#[async_trait]
impl AiBackend for MockBackend {
    async fn invoke(&self, request: &AiRequest) -> Result<Bytes, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            return Err(UpstreamError::Transport("mock backend dropped".to_string()));
        }

        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(Self::expected_body(request)),
        }
    }
}
