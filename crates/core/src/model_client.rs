use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use backoff::future::retry_notify;
use novus_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, ToolCallRequest,
};
use tracing::Instrument;

pub(crate) type OnDelta = Arc<dyn Fn(String) + Send + Sync>;
type BoxedError = Box<dyn ModelProviderError>;
type SendRequestResult = Result<ModelClientResponse, BoxedError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, OnDelta, ExponentialBackoff)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// How failed model requests are retried.
///
/// Delays grow exponentially from `initial_interval` up to `max_interval`.
/// Retrying stops once `max_elapsed_time` has passed since the first
/// attempt, `None` retries until the request succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of a single delay.
    pub max_interval: Duration,
    /// Upper bound of the whole retry sequence.
    pub max_elapsed_time: Option<Duration>,
}

impl RetryPolicy {
    /// Returns a policy that gives up after the first failure.
    pub fn never() -> Self {
        Self {
            max_elapsed_time: Some(Duration::ZERO),
            ..Default::default()
        }
    }

    /// Replaces the upper bound of the whole retry sequence.
    #[inline]
    pub fn with_max_elapsed_time(mut self, limit: Option<Duration>) -> Self {
        self.max_elapsed_time = limit;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(self.max_elapsed_time)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            max_elapsed_time: Some(Duration::from_secs(30)),
        }
    }
}

/// A wrapper around a model provider that retries failed requests and
/// provides a type-erased interface for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    policy: RetryPolicy,
}

impl ModelClient {
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let provider = Arc::new(provider);
        let handler_fn: HandlerFn = Arc::new(
            move |req: ModelRequest, on_delta: OnDelta, backoff: ExponentialBackoff| {
                let provider = Arc::clone(&provider);
                Box::pin(
                    send_with_retry(provider, req, on_delta, backoff)
                        .instrument(debug_span!("model client req")),
                ) as BoxedSendRequestFuture
            },
        );
        Self {
            handler_fn,
            policy: RetryPolicy::default(),
        }
    }

    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sends a request and returns the response, retrying transient
    /// failures according to the retry policy.
    ///
    /// Message deltas are passed to `on_delta` as they arrive. A failure
    /// after any delta was delivered is not retried, the caller has
    /// already shown part of the answer.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_delta: OnDelta,
    ) -> SendRequestResult {
        (self.handler_fn)(req, on_delta, self.policy.backoff()).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    /// The text of the response, may be empty when tools are called.
    pub content: String,
    /// Tool calls requested by the model, in the order they were emitted.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn send_with_retry<P: ModelProvider + 'static>(
    provider: Arc<P>,
    req: ModelRequest,
    on_delta: OnDelta,
    backoff: ExponentialBackoff,
) -> SendRequestResult {
    trace!("got a request: {:?}", req);
    let operation = || {
        let fut = provider.send_request(&req);
        let on_delta = Arc::clone(&on_delta);
        async move {
            let resp = fut.await.map_err(|err| classify(Box::new(err), false))?;
            handle_response(resp, on_delta).await
        }
    };
    let notify = |err: BoxedError, after: Duration| {
        warn!("model request failed ({err}), retry in {after:?}");
    };
    retry_notify(backoff, operation, notify).await
}

fn classify(err: BoxedError, streamed: bool) -> backoff::Error<BoxedError> {
    if err.kind().is_transient() && !streamed {
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

async fn handle_response<R: ModelResponse>(
    resp: R,
    on_delta: OnDelta,
) -> Result<ModelClientResponse, backoff::Error<BoxedError>> {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(classify(Box::new(err), !content.is_empty()));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                content.push_str(&msg);
                on_delta(msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        content,
        tool_calls,
        finish_reason,
    })
}
