//! Vision-model inference: one page image plus its cleaned text in, the
//! model's raw answer out.
//!
//! Prompt wording lives in [`crate::prompts`]. This module only assembles the
//! messages and calls the provider. There is no retry here: a failed call
//! fails the page, and the orchestrator records it.

use crate::config::TakeoffConfig;
use crate::pipeline::encode;
use crate::prompts::{page_context_message, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// The provider call failed.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InferenceError(pub String);

/// Turns a page image and its context text into the model's raw answer.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    /// `png` is the encoded page image; the returned string is unparsed.
    async fn infer(
        &self,
        png: &[u8],
        context_text: &str,
        page_number: u32,
    ) -> Result<String, InferenceError>;
}

/// [`StructuredExtractor`] over an `edgequake-llm` provider.
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
}

impl VisionExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &TakeoffConfig) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            provider,
            system_prompt,
            options: build_options(config),
        }
    }

    /// Messages sent for one page: system prompt, then text + image.
    fn messages(&self, png: &[u8], context_text: &str, page_number: u32) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(
                &page_context_message(page_number, context_text),
                vec![encode::image_data(png)],
            ),
        ]
    }
}

#[async_trait]
impl StructuredExtractor for VisionExtractor {
    async fn infer(
        &self,
        png: &[u8],
        context_text: &str,
        page_number: u32,
    ) -> Result<String, InferenceError> {
        let start = Instant::now();
        let messages = self.messages(png, context_text, page_number);

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| InferenceError(e.to_string()))?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page_number,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the run config.
fn build_options(config: &TakeoffConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
