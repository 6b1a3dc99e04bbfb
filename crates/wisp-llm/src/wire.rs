//! Chat-completions wire format shared by all provider kinds.
//!
//! Requests are built from a `ProviderRequest`; responses parse into the
//! protocol-neutral `ParsedResponse`. Tool-call arguments stay textual on the
//! wire and are parsed later, inside the invocation loop.

use serde::{Deserialize, Serialize};

use wisp_core::errors::ProviderError;
use wisp_core::ids::ToolCallId;
use wisp_core::messages::{Message, Role};
use wisp_core::provider::{ParsedResponse, ProviderRequest};
use wisp_core::tools::{ToolArguments, ToolCallRequest};

#[derive(Debug, Serialize)]
pub struct ChatRequestBody {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    pub stream: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunctionDef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunctionCall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as the wire format specifies.
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseBody {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One streamed delta payload.
#[derive(Debug, Deserialize)]
pub struct ChatStreamPayload {
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub struct StreamToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

pub fn build_request_body(request: &ProviderRequest, stream: bool) -> ChatRequestBody {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system.is_empty() {
        messages.push(WireMessage {
            role: "system".into(),
            content: Some(request.system.clone()),
            tool_calls: None,
            tool_call_id: None,
        });
    }
    messages.extend(request.messages.iter().map(to_wire_message));

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function".into(),
                    function: WireFunctionDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters_schema.clone(),
                    },
                })
                .collect(),
        )
    };

    ChatRequestBody {
        model: request.model.clone(),
        messages,
        tools,
        stream,
    }
}

fn to_wire_message(message: &Message) -> WireMessage {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(message.tool_calls.iter().map(to_wire_tool_call).collect())
    };
    WireMessage {
        role: role.into(),
        content: message.content.clone(),
        tool_calls,
        tool_call_id: message.tool_call_id.as_ref().map(|id| id.as_str().to_string()),
    }
}

fn to_wire_tool_call(call: &ToolCallRequest) -> WireToolCall {
    let arguments = match &call.arguments {
        ToolArguments::Text(raw) => raw.clone(),
        ToolArguments::Structured(value) => value.to_string(),
    };
    WireToolCall {
        id: call.id.as_str().to_string(),
        kind: "function".into(),
        function: WireFunctionCall {
            name: call.name.clone(),
            arguments,
        },
    }
}

/// Parse a non-streaming response body wholesale.
pub fn parse_response(raw: &str) -> Result<ParsedResponse, ProviderError> {
    let body: ChatResponseBody = serde_json::from_str(raw)
        .map_err(|e| ProviderError::Network(format!("malformed response body: {e}")))?;
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Network("response carried no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallRequest {
            id: ToolCallId::from_raw(tc.id),
            name: tc.function.name,
            arguments: ToolArguments::text(tc.function.arguments),
        })
        .collect();

    Ok(ParsedResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

/// Assembles streamed tool-call fragments, keyed by choice index.
#[derive(Default)]
pub struct ToolCallAccumulator {
    partial: Vec<PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &StreamToolCallDelta) {
        while self.partial.len() <= delta.index {
            self.partial.push(PartialCall::default());
        }
        let entry = &mut self.partial[delta.index];
        if let Some(id) = &delta.id {
            entry.id = Some(id.clone());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                entry.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Finish accumulation, yielding the assembled requests in index order.
    pub fn finish(&mut self) -> Vec<ToolCallRequest> {
        std::mem::take(&mut self.partial)
            .into_iter()
            .map(|p| ToolCallRequest {
                id: p.id.map(ToolCallId::from_raw).unwrap_or_default(),
                name: p.name,
                arguments: ToolArguments::text(p.arguments),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_core::tools::ToolDefinition;

    fn request_with_tools() -> ProviderRequest {
        ProviderRequest {
            model: "test-model".into(),
            system: "Be brief.".into(),
            messages: vec![Message::user("2+2?")],
            tools: vec![ToolDefinition {
                name: "calculator".into(),
                description: "Evaluates arithmetic expressions".into(),
                parameters_schema: serde_json::json!({"type": "object"}),
            }],
        }
    }

    #[test]
    fn request_body_places_system_first() {
        let body = build_request_body(&request_with_tools(), false);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[0].content.as_deref(), Some("Be brief."));
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(body.tools.as_ref().unwrap().len(), 1);
        assert!(!body.stream);
    }

    #[test]
    fn request_body_omits_empty_tools() {
        let mut request = request_with_tools();
        request.tools.clear();
        request.system.clear();
        let body = build_request_body(&request, true);
        assert!(body.tools.is_none());
        assert_eq!(body.messages.len(), 1);
        assert!(body.stream);
    }

    #[test]
    fn tool_messages_carry_call_ids_on_the_wire() {
        let call = ToolCallRequest {
            id: ToolCallId::from_raw("call_abc"),
            name: "calculator".into(),
            arguments: ToolArguments::structured(serde_json::json!({"expr": "2+2"})),
        };
        let request = ProviderRequest {
            model: "m".into(),
            system: String::new(),
            messages: vec![
                Message::assistant_with_tool_calls(None, vec![call.clone()]),
                Message::tool(call.id.clone(), r#"{"result":4}"#),
            ],
            tools: vec![],
        };
        let body = build_request_body(&request, false);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["tool_calls"][0]["id"], "call_abc");
        assert_eq!(
            json["messages"][0]["tool_calls"][0]["function"]["arguments"],
            r#"{"expr":"2+2"}"#
        );
        assert_eq!(json["messages"][1]["tool_call_id"], "call_abc");
    }

    #[test]
    fn parse_plain_text_response() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"4"},"finish_reason":"stop"}]}"#;
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.content, "4");
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parse_tool_call_response() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"expr\":\"2+2\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let parsed = parse_response(raw).unwrap();
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "calculator");
        assert_eq!(
            parsed.tool_calls[0].arguments.parse().unwrap()["expr"],
            "2+2"
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = parse_response("not json").unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));

        let err = parse_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[test]
    fn accumulator_assembles_fragmented_tool_call() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&StreamToolCallDelta {
            index: 0,
            id: Some("call_9".into()),
            function: Some(StreamFunctionDelta {
                name: Some("calculator".into()),
                arguments: Some("{\"expr\":".into()),
            }),
        });
        acc.push(&StreamToolCallDelta {
            index: 0,
            id: None,
            function: Some(StreamFunctionDelta {
                name: None,
                arguments: Some("\"2+2\"}".into()),
            }),
        });

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_str(), "call_9");
        assert_eq!(calls[0].name, "calculator");
        assert_eq!(calls[0].arguments.parse().unwrap()["expr"], "2+2");
    }

    #[test]
    fn accumulator_keeps_index_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&StreamToolCallDelta {
            index: 1,
            id: Some("call_b".into()),
            function: Some(StreamFunctionDelta {
                name: Some("echo".into()),
                arguments: Some("{}".into()),
            }),
        });
        acc.push(&StreamToolCallDelta {
            index: 0,
            id: Some("call_a".into()),
            function: Some(StreamFunctionDelta {
                name: Some("calculator".into()),
                arguments: Some("{}".into()),
            }),
        });

        let calls = acc.finish();
        assert_eq!(calls[0].id.as_str(), "call_a");
        assert_eq!(calls[1].id.as_str(), "call_b");
    }
}
