//! Language model abstraction and clients
//!
//! [`LanguageModel`] is the consumed invocation interface: one call in,
//! one direct value or fragment stream out. [`OpenAiCompatClient`] is the
//! shipped implementation, speaking the OpenAI chat-completions dialect
//! that most local and hosted endpoints accept.

use std::sync::Arc;

use tracing::debug;

mod client;
mod error;
mod openai;

pub use client::{LanguageModel, ModelResponse, ResponseStream};
#[cfg(test)]
pub use client::mock;
pub use error::ModelError;
pub use openai::OpenAiCompatClient;

use crate::config::ModelConfig;

/// Create a language model client based on the provider specified in config
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn LanguageModel>, ModelError> {
    debug!(provider = %config.provider, model = %config.model, "create_model: called");
    match config.provider.as_str() {
        "openai" | "openai-compatible" | "ollama" | "lmstudio" => Ok(Arc::new(OpenAiCompatClient::from_config(config)?)),
        other => Err(ModelError::InvalidResponse(format!(
            "Unknown model provider: '{}'. Supported: openai, openai-compatible, ollama, lmstudio",
            other
        ))),
    }
}
