//! Output orchestrator
//!
//! Watches for chat responses reaching a terminal state and turns their
//! free-form markdown into a typed spec/design/code triple. Per project
//! the orchestrator is a two-state machine - no artifact yet, has
//! artifact - whose only transition is a wholesale overwrite driven by a
//! complete, non-error, parseable response. Persistence and preview are
//! side effects of the transition, never preconditions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::extract::{extract_fenced_block, extract_section, normalize_bullet_lines};

/// Maximum title length taken from the user's request text
const MAX_TITLE_LEN: usize = 60;

/// Block size above which a missing closing document tag suggests the
/// model's output was cut off
const TRUNCATION_WARN_THRESHOLD: usize = 2000;

/// Fallback title when neither request text nor a Product section exists
const FALLBACK_TITLE: &str = "Generated App";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Parsed specification from the Product section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSpec {
    pub title: String,
    /// First normalized Product line
    pub summary: Option<String>,
    /// All normalized Product lines
    pub features: Vec<String>,
}

/// Parsed design from the Architecture section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDesign {
    /// First normalized Architecture line
    pub layout: Option<String>,
    pub components: Vec<String>,
    pub state_model: Vec<String>,
    pub interactions: Vec<String>,
}

/// The extracted artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub html: String,
}

/// A persisted artifact as returned by the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredApp {
    pub id: String,
    pub description: String,
    pub html: String,
    pub created_at: DateTime<Utc>,
}

/// A not-yet-persisted artifact handed to the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewApp {
    pub description: String,
    pub html: String,
}

/// Committed orchestration state for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationState {
    pub project_id: String,
    pub spec: Option<AppSpec>,
    pub design: Option<AppDesign>,
    pub code: GeneratedCode,
    /// Persistence outcome; `None` when saving failed
    pub last_stored_app: Option<StoredApp>,
}

/// Persistence collaborator
#[async_trait]
pub trait AppStorage: Send + Sync {
    async fn save_current(&self, app: NewApp) -> Result<StoredApp, StorageError>;
    async fn list_history(&self) -> Result<Vec<StoredApp>, StorageError>;
}

/// Live preview collaborator
#[async_trait]
pub trait PreviewSurface: Send + Sync {
    async fn set_preview_html(&self, html: Option<String>) -> Result<(), StorageError>;
}

/// Keyword lists driving the architecture-line classification heuristic.
///
/// Lines are checked against the state keywords first, then the
/// interaction keywords; anything left is a component. Matching is
/// case-insensitive. The defaults cover English terms plus the CJK prompt
/// vocabulary the heuristic was originally tuned for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureKeywords {
    pub state: Vec<String>,
    pub interaction: Vec<String>,
}

impl Default for ArchitectureKeywords {
    fn default() -> Self {
        Self {
            state: vec!["state".to_string(), "数据".to_string(), "状态".to_string()],
            interaction: vec![
                "click".to_string(),
                "input".to_string(),
                "flow".to_string(),
                "点击".to_string(),
                "输入".to_string(),
                "交互".to_string(),
            ],
        }
    }
}

impl ArchitectureKeywords {
    fn matches(keywords: &[String], line: &str) -> bool {
        let line = line.to_lowercase();
        keywords.iter().any(|k| line.contains(&k.to_lowercase()))
    }

    fn is_state_line(&self, line: &str) -> bool {
        Self::matches(&self.state, line)
    }

    fn is_interaction_line(&self, line: &str) -> bool {
        Self::matches(&self.interaction, line)
    }
}

/// A chat request/response pair that has reached a terminal state
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// Project key; one orchestration state per session
    pub session_id: String,
    /// The user's original request text
    pub request_text: String,
    pub response: ChatResponse,
}

/// Terminal response summary handed to the orchestrator
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub is_complete: bool,
    pub is_error: bool,
    pub text: String,
}

/// Per-project orchestration driven by completed chat responses
pub struct AppOrchestrator<S, P> {
    storage: S,
    preview: P,
    keywords: ArchitectureKeywords,
    state_by_project: Mutex<HashMap<String, OrchestrationState>>,
}

impl<S: AppStorage, P: PreviewSurface> AppOrchestrator<S, P> {
    pub fn new(storage: S, preview: P, keywords: ArchitectureKeywords) -> Self {
        Self {
            storage,
            preview,
            keywords,
            state_by_project: Mutex::new(HashMap::new()),
        }
    }

    /// Process one terminal chat response.
    ///
    /// Incomplete or errored responses, and responses without a fenced
    /// code block, leave any prior state untouched. Otherwise the
    /// project's state is rebuilt from scratch and committed, whether or
    /// not persistence and preview succeeded.
    pub async fn handle_completed_chat_request(&self, turn: &ChatTurn) {
        debug!(session_id = %turn.session_id, "handle_completed_chat_request: called");

        if !turn.response.is_complete || turn.response.is_error {
            debug!("handle_completed_chat_request: response not terminal-success, skipping");
            return;
        }

        let Some(html) = extract_fenced_block(&turn.response.text) else {
            debug!("handle_completed_chat_request: no fenced block, skipping");
            return;
        };

        if html.len() > TRUNCATION_WARN_THRESHOLD && !html.trim_end().ends_with("</html>") {
            warn!(
                len = html.len(),
                "handle_completed_chat_request: extracted block looks truncated (no closing </html>)"
            );
        }

        let spec = parse_product(&turn.response.text, &turn.request_text);
        let design = parse_architecture(&turn.response.text, &self.keywords);

        let description = spec
            .as_ref()
            .map(|s| s.title.clone())
            .unwrap_or_else(|| derive_title(&turn.request_text, None));

        let last_stored_app = match self
            .storage
            .save_current(NewApp {
                description: description.clone(),
                html: html.clone(),
            })
            .await
        {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(error = %e, "handle_completed_chat_request: persistence failed");
                None
            }
        };

        if let Err(e) = self.preview.set_preview_html(Some(html.clone())).await {
            warn!(error = %e, "handle_completed_chat_request: preview refresh failed");
        }

        let state = OrchestrationState {
            project_id: turn.session_id.clone(),
            spec,
            design,
            code: GeneratedCode { html },
            last_stored_app,
        };

        if let Ok(mut states) = self.state_by_project.lock() {
            states.insert(turn.session_id.clone(), state);
        }
    }

    /// Snapshot of the committed state for one project
    pub fn get_state(&self, project_id: &str) -> Option<OrchestrationState> {
        self.state_by_project
            .lock()
            .ok()
            .and_then(|states| states.get(project_id).cloned())
    }
}

/// Parse the Product section into a specification, `None` when the
/// section is absent or has no content lines
pub fn parse_product(response_text: &str, request_text: &str) -> Option<AppSpec> {
    let section = extract_section(response_text, "Product")?;
    let lines = normalize_bullet_lines(&section);
    if lines.is_empty() {
        return None;
    }

    Some(AppSpec {
        title: derive_title(request_text, lines.first().map(String::as_str)),
        summary: lines.first().cloned(),
        features: lines,
    })
}

/// Parse the Architecture section into a design, `None` when the section
/// is absent or has no content lines
pub fn parse_architecture(response_text: &str, keywords: &ArchitectureKeywords) -> Option<AppDesign> {
    let section = extract_section(response_text, "Architecture")?;
    let lines = normalize_bullet_lines(&section);
    if lines.is_empty() {
        return None;
    }

    let mut design = AppDesign {
        layout: lines.first().cloned(),
        components: Vec::new(),
        state_model: Vec::new(),
        interactions: Vec::new(),
    };

    for line in lines.iter().skip(1) {
        if keywords.is_state_line(line) {
            design.state_model.push(line.clone());
        } else if keywords.is_interaction_line(line) {
            design.interactions.push(line.clone());
        } else {
            design.components.push(line.clone());
        }
    }

    Some(design)
}

/// Title: the user's request text truncated to a bounded length, else the
/// first Product line, else a fixed fallback.
fn derive_title(request_text: &str, first_product_line: Option<&str>) -> String {
    let trimmed = request_text.trim();
    if !trimmed.is_empty() {
        return trimmed.chars().take(MAX_TITLE_LEN).collect();
    }
    match first_product_line {
        Some(line) if !line.is_empty() => line.to_string(),
        _ => FALLBACK_TITLE.to_string(),
    }
}
