use novus_model::{ModelMessage, ModelRequest, ModelTool, ToolCallRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::OpenAIConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionToolCall>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Choice {
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct Tool {
    r#type: &'static str,
    function: FunctionTool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    stream: bool,
}

// -----------
// Conversions
// -----------

pub fn create_request(
    req: &ModelRequest,
    config: &OpenAIConfig,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        tools: req.tools.iter().map(create_tool).collect(),
        stream: true,
    }
}

fn create_message(msg: &ModelMessage) -> Message {
    match msg {
        ModelMessage::System(content) => Message::System {
            content: content.clone(),
        },
        ModelMessage::User(content) => Message::User {
            content: content.clone(),
        },
        ModelMessage::Assistant(content) => Message::Assistant {
            content: Some(content.clone()),
            tool_calls: None,
        },
        ModelMessage::ToolCalls(turn) => Message::Assistant {
            content: (!turn.content.is_empty()).then(|| turn.content.clone()),
            tool_calls: Some(turn.calls.iter().map(create_tool_call).collect()),
        },
        ModelMessage::Tool(result) => Message::Tool {
            tool_call_id: result.id.clone(),
            content: result.content.clone(),
        },
    }
}

fn create_tool_call(call: &ToolCallRequest) -> ToolCall {
    ToolCall {
        index: None,
        id: Some(call.id.clone()),
        r#type: Some("function".to_owned()),
        function: Some(FunctionToolCall {
            name: Some(call.name.clone()),
            arguments: Some(call.arguments.to_string()),
        }),
    }
}

fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        r#type: "function",
        function: FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use novus_model::{AssistantToolCalls, ToolCallResult};
    use serde_json::json;

    use super::*;
    use crate::OpenAIConfigBuilder;

    #[test]
    fn test_create_request() {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::System("You are an analyst.".to_owned()),
                ModelMessage::User("Price of AAPL?".to_owned()),
            ],
            tools: vec![ModelTool {
                name: "get_current_stock_price".to_owned(),
                description: "Gets the current stock price.".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": { "symbol": { "type": "string" } }
                }),
            }],
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build();
        let expected = json!({
            "model": "custom",
            "messages": [
                { "role": "system", "content": "You are an analyst." },
                { "role": "user", "content": "Price of AAPL?" }
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_current_stock_price",
                    "description": "Gets the current stock price.",
                    "parameters": {
                        "type": "object",
                        "properties": { "symbol": { "type": "string" } }
                    }
                }
            }],
            "stream": true
        });
        let actual =
            serde_json::to_value(create_request(&request, &config)).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_tool_call_history() {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::ToolCalls(AssistantToolCalls {
                    content: String::new(),
                    calls: vec![ToolCallRequest {
                        id: "call_1".to_owned(),
                        name: "set_theme_color".to_owned(),
                        arguments: json!({ "theme_color": "indigo" }),
                    }],
                }),
                ModelMessage::Tool(ToolCallResult {
                    id: "call_1".to_owned(),
                    content: "done".to_owned(),
                }),
            ],
            tools: vec![],
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx").build();
        let actual =
            serde_json::to_value(create_request(&request, &config)).unwrap();
        assert_eq!(
            actual["messages"],
            json!([
                {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "set_theme_color",
                            "arguments": "{\"theme_color\":\"indigo\"}"
                        }
                    }]
                },
                { "role": "tool", "tool_call_id": "call_1", "content": "done" }
            ])
        );
        assert!(actual.get("tools").is_none());
    }
}
