//! OpenAI generator implementation.
//!
//! Works against the OpenAI API and compatible endpoints. Enable with the
//! `openai` feature flag.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use super::client::{Completion, GenerateOptions, Generator};
use crate::types::{AppError, Result};

fn generator_err(e: impl std::fmt::Display) -> AppError {
    AppError::AdapterUnavailable {
        adapter: "generator",
        message: e.to_string(),
        refund_txn_id: None,
    }
}

/// Generator backed by an OpenAI-compatible chat completion endpoint.
pub struct OpenAiGenerator {
    name: String,
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGenerator {
    /// Create a client for the given endpoint and model.
    pub fn new(name: String, api_key: String, api_base: String, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        Self {
            name,
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<Completion> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build system message: {}", e)))?;
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(user)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build user message: {}", e)))?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model);
        builder.messages(vec![
            ChatCompletionRequestMessage::System(system_message),
            ChatCompletionRequestMessage::User(user_message),
        ]);
        if let Some(temperature) = options.temperature {
            builder.temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            builder.max_completion_tokens(max_tokens);
        }

        let request = builder
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(generator_err)?;

        let (tokens_in, tokens_out) = response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| generator_err("empty completion"))?;

        Ok(Completion {
            text,
            tokens_in,
            tokens_out,
        })
    }
}
