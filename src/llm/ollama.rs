//! Ollama generator implementation.
//!
//! Local LLM inference via an Ollama server. Enable with the `ollama`
//! feature flag.

use async_trait::async_trait;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage},
    models::ModelOptions,
    Ollama,
};

use super::client::{Completion, GenerateOptions, Generator};
use crate::types::{AppError, Result};

/// Generator backed by a local Ollama server.
pub struct OllamaGenerator {
    name: String,
    client: Ollama,
    model: String,
}

impl OllamaGenerator {
    /// Create a client for the Ollama server at `base_url`.
    pub fn new(name: String, base_url: String, model: String) -> Result<Self> {
        let client = Ollama::try_new(base_url)
            .map_err(|e| AppError::Internal(format!("Invalid Ollama URL: {}", e)))?;
        Ok(Self {
            name,
            client,
            model,
        })
    }

    fn build_options(options: &GenerateOptions) -> ModelOptions {
        let mut model_options = ModelOptions::default();
        if let Some(temperature) = options.temperature {
            model_options = model_options.temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            model_options = model_options.num_predict(max_tokens as i32);
        }
        model_options
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<Completion> {
        let messages = vec![
            ChatMessage::system(system.to_string()),
            ChatMessage::user(user.to_string()),
        ];
        let request = ChatMessageRequest::new(self.model.clone(), messages)
            .options(Self::build_options(options));

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AppError::AdapterUnavailable {
                adapter: "generator",
                message: format!("Ollama error: {}", e),
                refund_txn_id: None,
            })?;

        let (tokens_in, tokens_out) = response
            .final_data
            .as_ref()
            .map(|d| (d.prompt_eval_count as u32, d.eval_count as u32))
            .unwrap_or((0, 0));

        Ok(Completion {
            text: response.message.content,
            tokens_in,
            tokens_out,
        })
    }
}
