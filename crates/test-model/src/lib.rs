//! A local scripted model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use novus_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<PresetEvent>,
    has_tool_call: bool,
    completed: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.completed {
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let event = match this.events.pop_front() {
            Some(PresetEvent::MessageDelta(msg)) => {
                ModelResponseEvent::MessageDelta(msg)
            }
            Some(PresetEvent::ToolCall(req)) => ModelResponseEvent::ToolCall(req),
            None => {
                this.completed = true;
                ModelResponseEvent::Completed(if this.has_tool_call {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                })
            }
        };
        Poll::Ready(Ok(Some(event)))
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    attempts: u64,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, queue the responses the model should give, one
/// per request, in order. Every request is recorded, failed attempts
/// included, so tests can inspect exactly what the agent sent. If the script
/// runs out, an error is returned.
///
/// Clones share the same script.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    /// Queues the response for the next unanswered request.
    #[inline]
    pub fn add_response(&mut self, preset: PresetResponse) {
        self.lock().responses.push_back(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panicking test thread must not hide the script from the others.
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let mut script = self.lock();
        script.requests.push(req.clone());

        let Some(preset) = script.responses.front() else {
            return ready(Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            }));
        };

        if preset.rejected {
            return ready(Err(Error {
                message: "scripted rejection",
                kind: ErrorKind::Rejected,
            }));
        }

        if let Some(failures) = preset.failures {
            if failures == 0 || script.attempts < failures {
                script.attempts += 1;
                return ready(Err(Error {
                    message: "scripted failure",
                    kind: ErrorKind::RateLimitExceeded,
                }));
            }
        }

        script.attempts = 0;
        let preset = script.responses.pop_front().unwrap_or_else(|| {
            unreachable!("the front response was checked above")
        });
        let has_tool_call = preset
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        ready(Ok(TestModelResponse {
            events: preset.events.into(),
            has_tool_call,
            completed: false,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;

    use novus_model::{ModelMessage, ToolCallRequest};
    use serde_json::json;

    use super::*;

    async fn collect_response(
        mut resp: TestModelResponse,
    ) -> (String, Vec<ToolCallRequest>, ModelFinishReason) {
        let mut msg = String::new();
        let mut tool_calls = vec![];
        loop {
            let event = poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                ModelResponseEvent::Completed(reason) => {
                    return (msg, tool_calls, reason);
                }
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
            }
        }
    }

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User(text.to_owned())],
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Hello, ".to_owned()),
            PresetEvent::MessageDelta("world!".to_owned()),
        ]));
        provider.add_response(PresetResponse::with_events([
            PresetEvent::MessageDelta("Checking the price.".to_owned()),
            PresetEvent::tool_call(
                "call:1",
                "get_current_stock_price",
                json!({ "symbol": "AAPL" }),
            ),
        ]));

        let resp = provider.send_request(&request("Hi")).await.unwrap();
        let (msg, tool_calls, reason) = collect_response(resp).await;
        assert_eq!(msg, "Hello, world!");
        assert!(tool_calls.is_empty());
        assert_eq!(reason, ModelFinishReason::Stop);

        let resp = provider
            .send_request(&request("How is Apple doing?"))
            .await
            .unwrap();
        let (msg, tool_calls, reason) = collect_response(resp).await;
        assert_eq!(msg, "Checking the price.");
        assert_eq!(tool_calls[0].name, "get_current_stock_price");
        assert_eq!(tool_calls[0].arguments, json!({ "symbol": "AAPL" }));
        assert_eq!(reason, ModelFinishReason::ToolCalls);

        assert_eq!(provider.requests().len(), 2);
        assert!(provider.send_request(&request("More?")).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::text("finally").with_failures(2));

        for _ in 0..2 {
            let err = provider.send_request(&request("Hi")).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        let resp = provider.send_request(&request("Hi")).await.unwrap();
        assert_eq!(collect_response(resp).await.0, "finally");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_rejection() {
        let mut provider = TestModelProvider::default();
        provider.add_response(PresetResponse::text("never").rejected());

        for _ in 0..2 {
            let err = provider.send_request(&request("Hi")).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Rejected);
        }
    }
}
