//! Core ExchangeStore implementation

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::{ResponsePart, UserRequest};

/// Shared, append-only fragment buffer for a streamed response.
///
/// One clone lives in the store record, one in the stream wrapper; both
/// observe the same accumulating list.
pub type PartBuffer = Arc<Mutex<Vec<ResponsePart>>>;

/// Create an empty fragment buffer
pub fn new_part_buffer() -> PartBuffer {
    Arc::new(Mutex::new(Vec::new()))
}

/// The recorded response of one model call
#[derive(Debug, Clone)]
pub enum RecordedResponse {
    /// A direct, non-streamed response
    Text(String),
    /// An accumulated list of stream fragments. Complete only once the
    /// stream wrapper's completion signal has fired.
    Parts(PartBuffer),
}

impl RecordedResponse {
    /// Assemble the full response text: the direct value, or the
    /// concatenation of all text fragments recorded so far.
    pub fn text(&self) -> String {
        match self {
            RecordedResponse::Text(text) => text.clone(),
            RecordedResponse::Parts(parts) => {
                let parts = parts.lock().expect("part buffer poisoned");
                parts.iter().filter_map(|p| p.as_text()).collect()
            }
        }
    }

    /// Number of fragments recorded so far (0 for direct responses)
    pub fn part_count(&self) -> usize {
        match self {
            RecordedResponse::Text(_) => 0,
            RecordedResponse::Parts(parts) => parts.lock().expect("part buffer poisoned").len(),
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, RecordedResponse::Parts(_))
    }
}

/// Metadata stamped onto an exchange request at creation time
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Agent that issued the request
    pub agent: Option<String>,
    /// Wall-clock creation time
    pub timestamp: Option<DateTime<Utc>>,
    /// Prompt variant used to build the request, if any
    pub prompt_variant_id: Option<String>,
    /// Whether the prompt variant was customized
    pub is_prompt_variant_customized: Option<bool>,
}

/// The smallest recorded unit: one model call and its response
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    /// Sub-request id if present, else the exchange id
    pub id: String,
    /// The original (filtered) request payload
    pub request: UserRequest,
    /// Identifier of the language model that served the call
    pub language_model: String,
    pub response: RecordedResponse,
    pub metadata: RequestMetadata,
}

/// Metadata on an exchange
#[derive(Debug, Clone, Default)]
pub struct ExchangeMetadata {
    /// Agent that originated the exchange
    pub agent: Option<String>,
}

/// One top-level request/response round within a session
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Top-level request id
    pub id: String,
    pub metadata: ExchangeMetadata,
    /// Ordered sub-requests, in recording order
    pub requests: Vec<ExchangeRequest>,
}

impl Exchange {
    /// Look up a recorded request by its effective id
    pub fn request(&self, id: &str) -> Option<&ExchangeRequest> {
        self.requests.iter().find(|r| r.id == id)
    }
}

/// A logical conversation containing one or more exchanges
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Ordered exchanges, in creation order
    pub exchanges: Vec<Exchange>,
}

impl Session {
    pub fn exchange(&self, id: &str) -> Option<&Exchange> {
        self.exchanges.iter().find(|e| e.id == id)
    }
}

/// In-memory index of all recorded sessions
///
/// Owned by exactly one dispatcher; constructor-injected rather than
/// global. A session exists here if and only if it has been referenced by
/// at least one recorded request since the last clear.
#[derive(Debug, Default)]
pub struct ExchangeStore {
    sessions: Vec<Session>,
}

impl ExchangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one model call under its session and exchange.
    ///
    /// Locates or creates the session by `request.session_id`, then the
    /// exchange by `request.request_id` within it, then appends a new
    /// [`ExchangeRequest`] keyed by the request's effective id. Metadata is
    /// stamped with the agent id, a creation timestamp, and the prompt
    /// variant fields when present.
    ///
    /// Returns the effective id under which the request was filed.
    pub fn record(&mut self, language_model: &str, request: UserRequest, response: RecordedResponse) -> String {
        let effective_id = request.effective_id().to_string();
        debug!(
            session_id = %request.session_id,
            request_id = %request.request_id,
            id = %effective_id,
            streamed = response.is_streamed(),
            "record: filing exchange request"
        );

        let session = match self.sessions.iter_mut().position(|s| s.id == request.session_id) {
            Some(idx) => &mut self.sessions[idx],
            None => {
                self.sessions.push(Session {
                    id: request.session_id.clone(),
                    exchanges: Vec::new(),
                });
                self.sessions.last_mut().expect("just pushed")
            }
        };

        let exchange = match session.exchanges.iter_mut().position(|e| e.id == request.request_id) {
            Some(idx) => &mut session.exchanges[idx],
            None => {
                session.exchanges.push(Exchange {
                    id: request.request_id.clone(),
                    metadata: ExchangeMetadata {
                        agent: Some(request.agent_id.clone()),
                    },
                    requests: Vec::new(),
                });
                session.exchanges.last_mut().expect("just pushed")
            }
        };

        if exchange.requests.iter().any(|r| r.id == effective_id) {
            warn!(
                exchange_id = %exchange.id,
                id = %effective_id,
                "record: duplicate request id within exchange"
            );
        }

        let metadata = RequestMetadata {
            agent: Some(request.agent_id.clone()),
            timestamp: Some(Utc::now()),
            prompt_variant_id: request.prompt_variant_id.clone(),
            is_prompt_variant_customized: request.is_prompt_variant_customized,
        };

        exchange.requests.push(ExchangeRequest {
            id: effective_id.clone(),
            request,
            language_model: language_model.to_string(),
            response,
            metadata,
        });

        effective_id
    }

    /// All recorded sessions, in creation order
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Replace the whole collection. Returns true when the store is empty
    /// afterwards, i.e. when the replacement was a clear.
    pub fn replace_sessions(&mut self, sessions: Vec<Session>) -> bool {
        debug!(count = sessions.len(), "replace_sessions: called");
        self.sessions = sessions;
        self.sessions.is_empty()
    }

    /// Drop all recorded sessions
    pub fn clear(&mut self) {
        debug!(count = self.sessions.len(), "clear: dropping all sessions");
        self.sessions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
