//! Interaction model types shared between the dispatcher and the store
//!
//! Messages and response fragments are closed tagged unions: every kind a
//! model can produce is enumerated here, so an unhandled kind is a compile
//! error rather than a silently ignored object shape.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in an outgoing model request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestMessage {
    /// Plain conversational text
    Text { role: Role, content: String },

    /// Reasoning content retained from an earlier response
    Thinking { content: String },

    /// A tool invocation issued by the model in an earlier turn
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The result of a tool invocation, fed back to the model
    ToolResult { tool_use_id: String, content: String },
}

impl RequestMessage {
    /// Create a user text message
    pub fn user(content: impl Into<String>) -> Self {
        RequestMessage::Text {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant text message
    pub fn assistant(content: impl Into<String>) -> Self {
        RequestMessage::Text {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a system text message
    pub fn system(content: impl Into<String>) -> Self {
        RequestMessage::Text {
            role: Role::System,
            content: content.into(),
        }
    }

    /// The message kind, matching its serde tag
    pub fn kind(&self) -> &'static str {
        match self {
            RequestMessage::Text { .. } => "text",
            RequestMessage::Thinking { .. } => "thinking",
            RequestMessage::ToolUse { .. } => "tool_use",
            RequestMessage::ToolResult { .. } => "tool_result",
        }
    }
}

/// One incremental piece of a streamed model response
///
/// This is the full vocabulary of stream fragments; matching on it is
/// exhaustive by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePart {
    /// A chunk of generated text
    Text { content: String },

    /// A completed tool call
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A chunk of reasoning content
    Thinking { thought: String },

    /// Token accounting, typically the final fragment of a stream
    Usage { input_tokens: u64, output_tokens: u64 },
}

impl ResponsePart {
    /// Create a text fragment
    pub fn text(content: impl Into<String>) -> Self {
        ResponsePart::Text {
            content: content.into(),
        }
    }

    /// Create the synthetic fragment appended to a transcript when the
    /// underlying stream fails. The marker makes clear the text did not
    /// come from the model.
    pub fn error_text(message: &str) -> Self {
        ResponsePart::Text {
            content: format!("[NOT FROM LLM] An error occurred: {message}"),
        }
    }

    /// Get the text content if this is a text fragment
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponsePart::Text { content } => Some(content),
            _ => None,
        }
    }
}

/// Client-side retention preferences applied when filtering outgoing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Keep `Thinking` messages in the outgoing request
    pub keep_thinking: bool,
    /// Keep `ToolUse` and `ToolResult` messages in the outgoing request
    pub keep_tool_calls: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            keep_thinking: true,
            keep_tool_calls: true,
        }
    }
}

/// A request submitted to the dispatcher on behalf of an agent
///
/// Carries the session/exchange/sub-request identity used to file the
/// recorded response, plus the cancellation token that travels with the
/// request all the way to the model call.
#[derive(Debug, Clone)]
pub struct UserRequest {
    /// Logical conversation this request belongs to
    pub session_id: String,
    /// Top-level request id, identifying the exchange
    pub request_id: String,
    /// Sub-request id when this call is one step of a larger exchange.
    /// Must not collide with the exchange's top-level id.
    pub sub_request_id: Option<String>,
    /// Id of the agent issuing the request
    pub agent_id: String,
    /// Prompt variant used to build this request, if any
    pub prompt_variant_id: Option<String>,
    /// Whether the prompt variant was customized by the user
    pub is_prompt_variant_customized: Option<bool>,
    pub client_settings: ClientSettings,
    /// Cancellation signal honored by the model call
    pub cancellation: CancellationToken,
    /// Ordered message list sent to the model (after filtering)
    pub messages: Vec<RequestMessage>,
}

impl UserRequest {
    /// Create a request with default settings and no messages
    pub fn new(session_id: impl Into<String>, request_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: request_id.into(),
            sub_request_id: None,
            agent_id: agent_id.into(),
            prompt_variant_id: None,
            is_prompt_variant_customized: None,
            client_settings: ClientSettings::default(),
            cancellation: CancellationToken::new(),
            messages: Vec::new(),
        }
    }

    /// Attach the ordered message list
    pub fn with_messages(mut self, messages: Vec<RequestMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the sub-request id
    pub fn with_sub_request_id(mut self, sub_request_id: impl Into<String>) -> Self {
        self.sub_request_id = Some(sub_request_id.into());
        self
    }

    /// The id under which this request is recorded: the sub-request id if
    /// present, else the top-level request id.
    pub fn effective_id(&self) -> &str {
        self.sub_request_id.as_deref().unwrap_or(&self.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = RequestMessage::user("hello");
        assert_eq!(
            msg,
            RequestMessage::Text {
                role: Role::User,
                content: "hello".to_string()
            }
        );

        let msg = RequestMessage::system("be brief");
        assert!(matches!(msg, RequestMessage::Text { role: Role::System, .. }));
    }

    #[test]
    fn test_message_serde_tagging() {
        let msg = RequestMessage::Thinking {
            content: "hmm".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"thinking\""));

        let parsed: RequestMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_kind_matches_serde_tag() {
        let msg = RequestMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], msg.kind());
        assert_eq!(
            RequestMessage::ToolResult {
                tool_use_id: "t".to_string(),
                content: "c".to_string()
            }
            .kind(),
            "tool_result"
        );
    }

    #[test]
    fn test_part_as_text() {
        assert_eq!(ResponsePart::text("x").as_text(), Some("x"));
        assert_eq!(
            ResponsePart::Usage {
                input_tokens: 1,
                output_tokens: 2
            }
            .as_text(),
            None
        );
    }

    #[test]
    fn test_error_text_marker() {
        let part = ResponsePart::error_text("boom");
        assert_eq!(part.as_text(), Some("[NOT FROM LLM] An error occurred: boom"));
    }

    #[test]
    fn test_client_settings_default_keeps_everything() {
        let settings = ClientSettings::default();
        assert!(settings.keep_thinking);
        assert!(settings.keep_tool_calls);
    }

    #[test]
    fn test_effective_id_falls_back_to_request_id() {
        let request = UserRequest::new("s1", "r1", "agent");
        assert_eq!(request.effective_id(), "r1");

        let request = request.with_sub_request_id("r1-sub");
        assert_eq!(request.effective_id(), "r1-sub");
    }
}
