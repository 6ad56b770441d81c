//! Chatloom - chat exchange recorder and app orchestrator
//!
//! Dispatches requests to a language model, records every exchange in an
//! in-memory session tree, and turns completed responses into structured
//! app artifacts (spec / design / code).
//!
//! # Architecture
//!
//! ```text
//! UserRequest
//!     │  ModelService::send_request
//!     ▼
//! LanguageModel ──► ModelResponse (direct text or fragment stream)
//!     │                   │
//!     │           RecordingStream (fragments buffered as they pass)
//!     ▼                   ▼
//! ExchangeStore ◄── RecordedResponse          broadcast SessionEvents
//!
//! completed response text
//!     │  AppOrchestrator::handle_completed_chat_request
//!     ▼
//! extract fenced block + parse sections ──► OrchestrationState
//!     │
//!     ├─► AppStorage::save_current
//!     └─► PreviewSurface::set_preview_html
//! ```

pub mod cli;
pub mod config;
pub mod extract;
pub mod model;
pub mod orchestrator;
pub mod service;
pub mod storage;
pub mod stream;

pub use model::{LanguageModel, ModelError, ModelResponse, ResponseStream, create_model};
pub use orchestrator::{
    AppDesign, AppOrchestrator, AppSpec, AppStorage, ArchitectureKeywords, ChatResponse, ChatTurn, GeneratedCode,
    NewApp, OrchestrationState, PreviewSurface, StorageError, StoredApp,
};
pub use service::{ModelService, SessionEvent};
pub use stream::RecordingStream;
