//! Scripted client for tests and offline hosts.
//!
//! [`MockClient`] replays queued [`MockResponse`]s in order and records
//! every request it receives, so the resilience layer can be exercised
//! without a network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchboard_core::{
    ContentBlock, InvocationResolver, LlmClient, LlmError, ModelSummary, ProviderKind, Request, Response,
    StopReason, TokenUsage,
};

/// One scripted outcome.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this response.
    Ok(Response),
    /// Fail with this error.
    Error(LlmError),
    /// Wait (cancellably), then produce the inner outcome.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A plain text reply ending the turn.
    pub fn text(text: &str) -> Self {
        Self::Ok(Response::new(
            vec![ContentBlock::text(text)],
            StopReason::EndTurn,
            Some(TokenUsage {
                input_tokens: 1,
                output_tokens: 1,
            }),
        ))
    }

    /// A backend failure.
    pub fn backend(status: u16, message: &str) -> Self {
        Self::Error(LlmError::backend(status, message))
    }

    /// Delay any outcome.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Client that replays scripted outcomes.
pub struct MockClient {
    kind: ProviderKind,
    model: String,
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<Request>>,
    models: Vec<ModelSummary>,
    resolver: Option<Arc<dyn InvocationResolver>>,
}

impl MockClient {
    /// Client for `kind` replaying `responses`.
    pub fn new(kind: ProviderKind, model: impl Into<String>, responses: Vec<MockResponse>) -> Self {
        Self {
            kind,
            model: model.into(),
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            models: Vec::new(),
            resolver: None,
        }
    }

    /// Expose `resolver` as the client's invocation resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn InvocationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Models returned by `list_models`.
    #[must_use]
    pub fn with_models(mut self, models: Vec<ModelSummary>) -> Self {
        self.models = models;
        self
    }

    /// Queue another outcome.
    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Number of requests received.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LlmClient for MockClient {
    fn provider_kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &Request) -> Result<Response, LlmError> {
        if request.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        let mut outcome = next.ok_or_else(|| LlmError::backend(500, "mock client has no scripted response"))?;
        let cancel = request.cancel_token();
        loop {
            match outcome {
                MockResponse::Ok(response) => return Ok(response),
                MockResponse::Error(err) => return Err(err),
                MockResponse::Delay(delay, inner) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(LlmError::Cancelled),
                        () = tokio::time::sleep(delay) => outcome = *inner,
                    }
                }
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, LlmError> {
        Ok(self.models.clone())
    }

    fn invocation_resolver(&self) -> Option<Arc<dyn InvocationResolver>> {
        self.resolver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{CancellationToken, Message};

    fn request() -> Request {
        Request::new("", 10).with_message(Message::user("hi"))
    }

    #[tokio::test]
    async fn replays_in_order_and_records() {
        let mock = MockClient::new(
            ProviderKind::Anthropic,
            "m",
            vec![MockResponse::text("one"), MockResponse::backend(429, "slow down")],
        );
        assert_eq!(mock.send(&request()).await.unwrap().text(), "one");
        assert_eq!(mock.send(&request()).await.unwrap_err().status(), Some(429));
        assert_eq!(mock.call_count(), 2);
        assert!(mock.send(&request()).await.is_err());
    }

    #[tokio::test]
    async fn pre_cancelled_request_is_not_recorded() {
        let mock = MockClient::new(ProviderKind::OpenAi, "m", vec![MockResponse::text("x")]);
        let token = CancellationToken::new();
        token.cancel();
        let err = mock.send(&request().with_cancel(token)).await.unwrap_err();
        assert_eq!(err, LlmError::Cancelled);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_honours_cancellation() {
        let mock = MockClient::new(
            ProviderKind::OpenAi,
            "m",
            vec![MockResponse::delayed(Duration::from_secs(60), MockResponse::text("late"))],
        );
        let token = CancellationToken::new();
        let trigger = token.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = mock.send(&request().with_cancel(token)).await.unwrap_err();
        assert_eq!(err, LlmError::Cancelled);
    }
}
