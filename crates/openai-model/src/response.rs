use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use novus_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, FunctionToolCall, ToolCall};

/// Accumulates streamed deltas between two emitted events.
struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<ToolCall>,
    // Tool calls are only complete once the model finishes, so they are
    // held back until the finish reason arrives and then emitted in order.
    ready_tool_calls: VecDeque<ToolCallRequest>,
    pending_finish_reason: Option<ModelFinishReason>,
    stream_ended: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            ready_tool_calls: Default::default(),
            pending_finish_reason: Default::default(),
            stream_ended: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));
        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut state: PartialState) -> NextEvent {
    // The order of events matters: message deltas stream as they come, then
    // the completed tool calls, and the finish reason goes last.
    loop {
        if let Some(call) = state.ready_tool_calls.pop_front() {
            return Ok((Some(ModelResponseEvent::ToolCall(call)), state));
        }
        if let Some(reason) = state.pending_finish_reason.take() {
            return Ok((Some(ModelResponseEvent::Completed(reason)), state));
        }
        if state.stream_ended {
            return Ok((None, state));
        }

        let sse_event = match state.sse.next_event().await {
            Ok(Some(event)) if event != "[DONE]" => event,
            Ok(_) => {
                state.stream_ended = true;
                // Some gateways close the stream without a finish reason.
                if !state.tool_calls.is_empty() {
                    finish_tool_calls(&mut state);
                    state.pending_finish_reason =
                        Some(ModelFinishReason::ToolCalls);
                }
                continue;
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");

        let mut chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }

        // The usage chunk at the end carries no choice.
        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        if let Some(tool_calls) = choice.delta.tool_calls {
            for tool_call in tool_calls {
                merge_tool_call(&mut state.tool_calls, tool_call);
            }
        }

        if let Some(finish_reason) = choice.finish_reason {
            finish_tool_calls(&mut state);
            state.pending_finish_reason = Some(
                if finish_reason == "tool_calls" || !state.ready_tool_calls.is_empty()
                {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                },
            );
        }

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                return Ok((
                    Some(ModelResponseEvent::MessageDelta(content)),
                    state,
                ));
            }
        }
    }
}

fn merge_tool_call(tool_calls: &mut Vec<ToolCall>, delta: ToolCall) {
    let Some(partial) = tool_calls.iter_mut().find(|t| t.index == delta.index)
    else {
        tool_calls.push(delta);
        return;
    };
    if let Some(id) = delta.id {
        partial.id.get_or_insert_default().push_str(&id);
    }
    if let Some(ty) = delta.r#type {
        partial.r#type.get_or_insert_default().push_str(&ty);
    }
    let Some(function) = delta.function else {
        return;
    };
    let partial_func = partial.function.get_or_insert(FunctionToolCall {
        name: None,
        arguments: None,
    });
    if let Some(name) = function.name {
        partial_func.name.get_or_insert_default().push_str(&name);
    }
    if let Some(arguments) = function.arguments {
        partial_func.arguments.get_or_insert_default().push_str(&arguments);
    }
}

fn finish_tool_calls(state: &mut PartialState) {
    for (position, tool_call) in state.tool_calls.drain(..).enumerate() {
        let function = tool_call.function.unwrap_or(FunctionToolCall {
            name: None,
            arguments: None,
        });
        // Arguments that are not valid JSON are passed on as a string, the
        // tool decoder then reports the problem back to the model.
        let arguments = match function.arguments.as_deref() {
            None | Some("") => Value::Object(Default::default()),
            Some(raw) => serde_json::from_str(raw)
                .unwrap_or_else(|_| Value::String(raw.to_owned())),
        };
        // Some compatible servers omit the id. Results are matched by id, so
        // every call needs a distinct one.
        let id = tool_call.id.filter(|id| !id.is_empty()).unwrap_or_else(|| {
            let index = tool_call.index.map_or(position, |index| index as usize);
            format!("call_{index}")
        });
        state.ready_tool_calls.push_back(ToolCallRequest {
            id,
            name: function.name.unwrap_or_default(),
            arguments,
        });
    }
}
