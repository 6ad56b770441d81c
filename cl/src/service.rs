//! Request dispatcher and session event bus
//!
//! [`ModelService`] is the single entry point for issuing model requests.
//! It filters outgoing messages per client settings, dispatches to the
//! model, wraps streamed responses so every fragment is recorded, files the
//! call in the [`ExchangeStore`], and notifies subscribers over a broadcast
//! channel.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use exchangestore::{ExchangeStore, RecordedResponse, RequestMessage, Session, UserRequest, new_part_buffer};

use crate::model::{LanguageModel, ModelError, ModelResponse};
use crate::stream::RecordingStream;

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notifications emitted as the recorded session collection changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new exchange request was linked into the store
    RequestAdded { id: String },
    /// A streamed response finished iterating (success, failure, or
    /// abandonment). Tagged with the request's effective id.
    ResponseCompleted { request_id: String },
    /// The session collection was replaced with an empty one
    SessionsCleared,
}

/// Dispatches model requests and records every exchange
pub struct ModelService {
    store: Mutex<ExchangeStore>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Default for ModelService {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelService {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: Mutex::new(ExchangeStore::new()),
            event_tx,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Dispatch one request to a model, recording the exchange.
    ///
    /// Messages the client opted out of are dropped before dispatch. A
    /// streamed result is wrapped so fragments accumulate in the store as
    /// they pass through, with a completion event fired once iteration
    /// ends; a direct result is recorded as-is. Failures that occur before
    /// any response exists propagate without leaving a record.
    pub async fn send_request(
        self: &Arc<Self>,
        model: &Arc<dyn LanguageModel>,
        mut request: UserRequest,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            session_id = %request.session_id,
            request_id = %request.request_id,
            model = %model.id(),
            "send_request: called"
        );

        filter_messages(&mut request.messages, &request.client_settings);

        let cancel = request.cancellation.clone();
        let response = model.request(&request, cancel).await?;
        let language_model = model.id().to_string();
        debug!(streamed = response.is_stream(), "send_request: response received");

        let (response, recorded) = match response {
            ModelResponse::Text(text) => {
                debug!(len = text.len(), "send_request: direct response");
                (ModelResponse::Text(text.clone()), RecordedResponse::Text(text))
            }
            ModelResponse::Stream(inner) => {
                let buffer = new_part_buffer();
                let completed_id = request.effective_id().to_string();
                let service = Arc::clone(self);
                let on_complete = Box::new(move || {
                    debug!(request_id = %completed_id, "send_request: stream completed");
                    service.emit(SessionEvent::ResponseCompleted {
                        request_id: completed_id,
                    });
                });
                let wrapped = RecordingStream::new(inner, buffer.clone(), on_complete);
                (
                    ModelResponse::Stream(Box::pin(wrapped)),
                    RecordedResponse::Parts(buffer),
                )
            }
        };

        let id = {
            let mut store = self.store.lock().map_err(|_| poisoned())?;
            store.record(&language_model, request, recorded)
        };
        self.emit(SessionEvent::RequestAdded { id });

        Ok(response)
    }

    /// Snapshot of all recorded sessions
    pub fn sessions(&self) -> Result<Vec<Session>, ModelError> {
        let store = self.store.lock().map_err(|_| poisoned())?;
        Ok(store.sessions().to_vec())
    }

    pub fn session(&self, id: &str) -> Result<Option<Session>, ModelError> {
        let store = self.store.lock().map_err(|_| poisoned())?;
        Ok(store.session(id).cloned())
    }

    /// Replace the whole session collection.
    ///
    /// Replacing with an empty collection is a clear and announces itself
    /// as one.
    pub fn replace_sessions(&self, sessions: Vec<Session>) -> Result<(), ModelError> {
        let cleared = {
            let mut store = self.store.lock().map_err(|_| poisoned())?;
            store.replace_sessions(sessions)
        };
        if cleared {
            self.emit(SessionEvent::SessionsCleared);
        }
        Ok(())
    }

    /// Drop all recorded sessions
    pub fn clear_sessions(&self) -> Result<(), ModelError> {
        self.replace_sessions(Vec::new())
    }
}

fn poisoned() -> ModelError {
    ModelError::InvalidResponse("exchange store lock poisoned".to_string())
}

/// Drop messages the client's retention settings exclude
fn filter_messages(messages: &mut Vec<RequestMessage>, settings: &exchangestore::ClientSettings) {
    messages.retain(|msg| match msg {
        RequestMessage::Text { .. } => true,
        RequestMessage::Thinking { .. } => settings.keep_thinking,
        RequestMessage::ToolUse { .. } | RequestMessage::ToolResult { .. } => settings.keep_tool_calls,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    use exchangestore::{ClientSettings, ResponsePart};

    use crate::model::mock::{MockModel, MockResponse};

    fn service() -> Arc<ModelService> {
        Arc::new(ModelService::new())
    }

    fn as_model(mock: MockModel) -> Arc<dyn LanguageModel> {
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_direct_response_recorded_and_announced() {
        let service = service();
        let mut events = service.subscribe();
        let model = as_model(MockModel::new(vec![MockResponse::Text("hello".to_string())]));

        let request = UserRequest::new("s1", "r1", "agent").with_messages(vec![RequestMessage::user("hi")]);
        let response = service.send_request(&model, request).await.unwrap();
        assert!(matches!(response, ModelResponse::Text(ref t) if t == "hello"));

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::RequestAdded { id: "r1".to_string() }
        );

        let sessions = service.sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        let recorded = &sessions[0].exchanges[0].requests[0];
        assert_eq!(recorded.response.text(), "hello");
        assert!(!recorded.response.is_streamed());
    }

    #[tokio::test]
    async fn test_streamed_response_recorded_fragment_by_fragment() {
        let service = service();
        let mut events = service.subscribe();
        let model = as_model(MockModel::new(vec![MockResponse::Parts(vec![
            ResponsePart::text("a"),
            ResponsePart::text("b"),
        ])]));

        let request = UserRequest::new("s1", "r1", "agent");
        let response = service.send_request(&model, request).await.unwrap();

        // Recorded before any fragment has been consumed
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::RequestAdded { id: "r1".to_string() }
        );
        let recorded = service.session("s1").unwrap().unwrap().exchanges[0].requests[0].clone();
        assert!(recorded.response.is_streamed());
        assert_eq!(recorded.response.part_count(), 0);

        let ModelResponse::Stream(mut stream) = response else {
            panic!("expected stream");
        };
        while stream.next().await.is_some() {}
        drop(stream);

        assert_eq!(recorded.response.part_count(), 2);
        assert_eq!(recorded.response.text(), "ab");
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ResponseCompleted {
                request_id: "r1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_completion_uses_sub_request_id() {
        let service = service();
        let mut events = service.subscribe();
        let model = as_model(MockModel::new(vec![MockResponse::Parts(vec![ResponsePart::text("x")])]));

        let request = UserRequest::new("s1", "r1", "agent").with_sub_request_id("r1-step");
        let response = service.send_request(&model, request).await.unwrap();

        let ModelResponse::Stream(mut stream) = response else {
            panic!("expected stream");
        };
        while stream.next().await.is_some() {}
        drop(stream);

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::RequestAdded {
                id: "r1-step".to_string()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ResponseCompleted {
                request_id: "r1-step".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_abandoned_stream_still_completes() {
        let service = service();
        let mut events = service.subscribe();
        let model = as_model(MockModel::new(vec![MockResponse::Parts(vec![
            ResponsePart::text("a"),
            ResponsePart::text("b"),
        ])]));

        let request = UserRequest::new("s1", "r1", "agent");
        let response = service.send_request(&model, request).await.unwrap();
        let _ = events.try_recv();

        drop(response);

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ResponseCompleted {
                request_id: "r1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_stream_failure_records_marker_and_completes() {
        let service = service();
        let mut events = service.subscribe();
        let model = as_model(MockModel::new(vec![MockResponse::PartsThenError(
            vec![ResponsePart::text("partial")],
            "connection reset".to_string(),
        )]));

        let request = UserRequest::new("s1", "r1", "agent");
        let response = service.send_request(&model, request).await.unwrap();
        let _ = events.try_recv();

        let ModelResponse::Stream(mut stream) = response else {
            panic!("expected stream");
        };
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());

        let recorded = service.session("s1").unwrap().unwrap().exchanges[0].requests[0].clone();
        assert_eq!(recorded.response.part_count(), 2);
        assert!(recorded.response.text().contains("[NOT FROM LLM] An error occurred:"));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ResponseCompleted {
                request_id: "r1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_pre_response_failure_leaves_no_record() {
        let service = service();
        let mut events = service.subscribe();
        let model = as_model(MockModel::new(vec![MockResponse::Error(ModelError::ApiError {
            status: 401,
            message: "bad key".to_string(),
        })]));

        let request = UserRequest::new("s1", "r1", "agent");
        let result = service.send_request(&model, request).await;
        assert!(result.is_err());
        assert!(service.sessions().unwrap().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_message_filtering() {
        let mut messages = vec![
            RequestMessage::user("hi"),
            RequestMessage::Thinking {
                content: "hmm".to_string(),
            },
            RequestMessage::ToolUse {
                id: "t1".to_string(),
                name: "search".to_string(),
                input: serde_json::json!({}),
            },
            RequestMessage::ToolResult {
                tool_use_id: "t1".to_string(),
                content: "ok".to_string(),
            },
        ];

        let keep_all = ClientSettings::default();
        let mut all = messages.clone();
        filter_messages(&mut all, &keep_all);
        assert_eq!(all.len(), 4);

        let drop_both = ClientSettings {
            keep_thinking: false,
            keep_tool_calls: false,
        };
        filter_messages(&mut messages, &drop_both);
        assert_eq!(messages, vec![RequestMessage::user("hi")]);
    }

    #[tokio::test]
    async fn test_replace_sessions_announces_clear() {
        let service = service();
        let mut events = service.subscribe();
        let model = as_model(MockModel::new(vec![MockResponse::Text("x".to_string())]));

        let request = UserRequest::new("s1", "r1", "agent");
        service.send_request(&model, request).await.unwrap();
        let _ = events.try_recv();

        // Non-empty replacement is not a clear
        let snapshot = service.sessions().unwrap();
        service.replace_sessions(snapshot).unwrap();
        assert!(events.try_recv().is_err());

        service.clear_sessions().unwrap();
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SessionsCleared);
        assert!(service.sessions().unwrap().is_empty());
    }
}
