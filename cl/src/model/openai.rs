//! OpenAI-compatible chat completions client
//!
//! Implements the LanguageModel trait against any endpoint speaking the
//! OpenAI `/v1/chat/completions` dialect, with support for both blocking
//! and SSE-streaming responses.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use exchangestore::{RequestMessage, ResponsePart, Role, UserRequest};

use super::{LanguageModel, ModelError, ModelResponse};
use crate::config::ModelConfig;

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 1000;

/// OpenAI-compatible API client
pub struct OpenAiCompatClient {
    id: String,
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    /// Whether to request streamed responses
    stream: bool,
}

impl OpenAiCompatClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        debug!(model = %config.model, base_url = %config.base_url, "from_config: called");
        let api_key = config
            .api_key()
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ModelError::Network)?;

        Ok(Self {
            id: format!("{}/{}", config.provider, config.model),
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
            stream: config.stream,
        })
    }

    /// Build the request body for the chat completions API
    fn build_request_body(&self, request: &UserRequest) -> serde_json::Value {
        debug!(model = %self.model, message_count = request.messages.len(), "build_request_body: called");
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": convert_messages(&request.messages),
        })
    }
}

/// Convert internal messages to the OpenAI wire format
///
/// Tool results become one `tool` message each; tool invocations become
/// assistant messages carrying a `tool_calls` array; retained thinking is
/// sent as assistant content.
fn convert_messages(messages: &[RequestMessage]) -> Vec<serde_json::Value> {
    let mut result = Vec::new();

    for msg in messages {
        match msg {
            RequestMessage::Text { role, content } => {
                let role = match role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                result.push(serde_json::json!({ "role": role, "content": content }));
            }
            RequestMessage::Thinking { content } => {
                result.push(serde_json::json!({ "role": "assistant", "content": content }));
            }
            RequestMessage::ToolUse { id, name, input } => {
                result.push(serde_json::json!({
                    "role": "assistant",
                    "tool_calls": [{
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": input.to_string() },
                    }],
                }));
            }
            RequestMessage::ToolResult { tool_use_id, content } => {
                result.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                }));
            }
        }
    }

    result
}

#[async_trait]
impl LanguageModel for OpenAiCompatClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn request(&self, request: &UserRequest, cancel: CancellationToken) -> Result<ModelResponse, ModelError> {
        if self.stream {
            self.request_streaming(request, cancel).await
        } else {
            self.request_blocking(request, cancel).await
        }
    }
}

impl OpenAiCompatClient {
    /// Blocking completion with bounded retry on transient failures
    async fn request_blocking(
        &self,
        request: &UserRequest,
        cancel: CancellationToken,
    ) -> Result<ModelResponse, ModelError> {
        debug!(model = %self.model, "request_blocking: called");
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(request);

        let mut last_error: Option<ModelError> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                // A rate-limit error dictates its own delay; everything
                // else backs off exponentially
                let backoff = last_error
                    .as_ref()
                    .and_then(ModelError::retry_after)
                    .unwrap_or_else(|| Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1)));
                warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "request_blocking: retrying after transient error"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            if cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }

            let send = self
                .http
                .post(url.clone())
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("content-type", "application/json")
                .json(&body)
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                result = send => match result {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(attempt, error = %e, "request_blocking: network error");
                        last_error = Some(ModelError::Network(e));
                        continue;
                    }
                },
            };

            let status = response.status().as_u16();

            if !response.status().is_success() {
                let err = if status == 429 {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(60);
                    ModelError::RateLimited {
                        retry_after: Duration::from_secs(retry_after),
                    }
                } else {
                    let text = response.text().await.unwrap_or_default();
                    ModelError::ApiError { status, message: text }
                };

                if err.is_retryable() && attempt < MAX_RETRIES {
                    debug!(attempt, status, "request_blocking: retryable error");
                    last_error = Some(err);
                    continue;
                }
                return Err(err);
            }

            let api_response: ChatResponse = response.json().await.map_err(ModelError::Network)?;
            let text = api_response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            return Ok(ModelResponse::Text(text));
        }

        Err(last_error.unwrap_or_else(|| ModelError::InvalidResponse("Max retries exceeded".to_string())))
    }

    /// Streaming completion over server-sent events
    ///
    /// The SSE connection is driven by a background task; the returned
    /// stream is fed through a channel so the consumer controls pacing.
    async fn request_streaming(
        &self,
        request: &UserRequest,
        cancel: CancellationToken,
    ) -> Result<ModelResponse, ModelError> {
        debug!(model = %self.model, "request_streaming: called");
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut body = self.build_request_body(request);
        body["stream"] = serde_json::json!(true);
        body["stream_options"] = serde_json::json!({ "include_usage": true });

        let mut es = None;
        let mut last_error = None;

        // Retry loop for establishing the connection
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(attempt, backoff_ms = backoff, "request_streaming: retrying connection");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let http_request = self
                .http
                .post(url.clone())
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("content-type", "application/json")
                .json(&body);

            match EventSource::new(http_request) {
                Ok(event_source) => {
                    es = Some(event_source);
                    break;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "request_streaming: EventSource creation failed");
                    last_error = Some(ModelError::EventSource(e.to_string()));
                    continue;
                }
            }
        }

        let es = es.ok_or_else(|| {
            last_error.unwrap_or_else(|| ModelError::EventSource("Failed to create EventSource".to_string()))
        })?;

        let (tx, rx) = mpsc::channel::<Result<ResponsePart, ModelError>>(32);
        tokio::spawn(drive_sse(es, tx, cancel));

        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        Ok(ModelResponse::Stream(Box::pin(stream)))
    }
}

/// Decode SSE events into response fragments until the stream ends,
/// fails, is cancelled, or the consumer goes away.
async fn drive_sse(
    mut es: EventSource,
    tx: mpsc::Sender<Result<ResponsePart, ModelError>>,
    cancel: CancellationToken,
) {
    // index -> (id, name, accumulated argument json)
    let mut pending_tools: HashMap<usize, (String, String, String)> = HashMap::new();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("drive_sse: cancelled");
                es.close();
                let _ = tx.send(Err(ModelError::Cancelled)).await;
                return;
            }
            event = es.next() => event,
        };

        match event {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => {
                if msg.data == "[DONE]" {
                    debug!("drive_sse: stream done");
                    es.close();
                    break;
                }

                let chunk: ChatStreamChunk = match serde_json::from_str(&msg.data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        debug!(error = %e, "drive_sse: undecodable chunk");
                        es.close();
                        let _ = tx.send(Err(ModelError::Json(e))).await;
                        return;
                    }
                };

                if let Some(choice) = chunk.choices.first() {
                    if let Some(content) = &choice.delta.content
                        && !content.is_empty()
                        && tx.send(Ok(ResponsePart::text(content.clone()))).await.is_err()
                    {
                        // Consumer abandoned the stream
                        es.close();
                        return;
                    }

                    if let Some(thought) = &choice.delta.reasoning_content
                        && !thought.is_empty()
                        && tx
                            .send(Ok(ResponsePart::Thinking {
                                thought: thought.clone(),
                            }))
                            .await
                            .is_err()
                    {
                        es.close();
                        return;
                    }

                    if let Some(tool_deltas) = &choice.delta.tool_calls {
                        for delta in tool_deltas {
                            let entry = pending_tools.entry(delta.index).or_default();
                            if let Some(id) = &delta.id {
                                entry.0 = id.clone();
                            }
                            if let Some(func) = &delta.function {
                                if let Some(name) = &func.name {
                                    entry.1 = name.clone();
                                }
                                if let Some(arguments) = &func.arguments {
                                    entry.2.push_str(arguments);
                                }
                            }
                        }
                    }
                }

                if let Some(usage) = chunk.usage {
                    let part = ResponsePart::Usage {
                        input_tokens: usage.prompt_tokens,
                        output_tokens: usage.completion_tokens,
                    };
                    if tx.send(Ok(part)).await.is_err() {
                        es.close();
                        return;
                    }
                }
            }
            Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                debug!("drive_sse: stream ended");
                break;
            }
            Some(Err(e)) => {
                debug!(error = %e, "drive_sse: stream error");
                es.close();
                let _ = tx.send(Err(ModelError::EventSource(e.to_string()))).await;
                return;
            }
            None => break,
        }
    }

    // Completed tool calls are emitted once the stream has ended
    let mut tools: Vec<_> = pending_tools.into_iter().collect();
    tools.sort_by_key(|(index, _)| *index);
    for (_, (id, name, arguments)) in tools {
        let arguments = serde_json::from_str(&arguments).unwrap_or(serde_json::json!({}));
        let part = ResponsePart::ToolCall { id, name, arguments };
        if tx.send(Ok(part)).await.is_err() {
            return;
        }
    }
}

// Wire format types

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ChatStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<ChatStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
