use novus_model::ToolCallRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
}

impl PresetEvent {
    /// Shorthand for a tool call event.
    pub fn tool_call<S1, S2>(id: S1, name: S2, arguments: Value) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        PresetEvent::ToolCall(ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments,
        })
    }
}

/// The preset response for one model request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
    /// If set, every attempt is refused as a bad request, which is never
    /// worth retrying.
    #[serde(default)]
    pub rejected: bool,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            rejected: false,
        }
    }

    /// Creates a text-only response.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Makes every attempt of this response fail as rejected.
    #[inline]
    pub fn rejected(mut self) -> Self {
        self.rejected = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let response = PresetResponse::with_events([
            PresetEvent::MessageDelta("Let me draft the steps.".to_string()),
            PresetEvent::tool_call(
                "call:1",
                "generate_task_steps",
                json!({
                    "steps": [{ "description": "Book flight tickets", "status": "enabled" }]
                }),
            ),
        ])
        .with_failures(2);

        let serialized = serde_json::to_string(&response).unwrap();
        let deserialized: PresetResponse =
            serde_json::from_str(&serialized).unwrap();

        assert_eq!(response, deserialized);
    }
}
