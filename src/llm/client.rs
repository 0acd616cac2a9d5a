//! Generator abstractions and provider management.
//!
//! Providers are interchangeable behind the [`Generator`] trait; the
//! configuration names one primary and at most one fallback. The
//! [`FallbackGenerator`] applies the per-provider timeout and falls back
//! exactly once.

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{AppError, Result};
use crate::utils::config::ProviderSettings;

/// Inference options forwarded to a provider.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

/// One completed generation.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Prompt tokens consumed.
    pub tokens_in: u32,
    /// Completion tokens produced.
    pub tokens_out: u32,
}

/// Text generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Configured provider name (e.g. "openai", "ollama").
    fn provider_name(&self) -> &str;

    /// Generate a completion for a system + user prompt pair.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<Completion>;
}

/// Build a generator client from a named provider configuration.
///
/// # Errors
///
/// Returns an error when the provider type's cargo feature is disabled or
/// a referenced environment variable is missing.
pub fn create_generator(name: &str, settings: &ProviderSettings) -> Result<Box<dyn Generator>> {
    match settings {
        ProviderSettings::OpenAI {
            api_key_env,
            api_base,
            model,
        } => {
            #[cfg(feature = "openai")]
            {
                let api_key = std::env::var(api_key_env).map_err(|_| {
                    AppError::Internal(format!("{} must be set for provider {}", api_key_env, name))
                })?;
                Ok(Box::new(super::openai::OpenAiGenerator::new(
                    name.to_string(),
                    api_key,
                    api_base.clone(),
                    model.clone(),
                )))
            }
            #[cfg(not(feature = "openai"))]
            {
                let _ = (api_key_env, api_base, model);
                Err(AppError::Internal(format!(
                    "provider {} requires the `openai` feature",
                    name
                )))
            }
        }
        ProviderSettings::Ollama { base_url, model } => {
            #[cfg(feature = "ollama")]
            {
                Ok(Box::new(super::ollama::OllamaGenerator::new(
                    name.to_string(),
                    base_url.clone(),
                    model.clone(),
                )?))
            }
            #[cfg(not(feature = "ollama"))]
            {
                let _ = (base_url, model);
                Err(AppError::Internal(format!(
                    "provider {} requires the `ollama` feature",
                    name
                )))
            }
        }
    }
}

/// Primary + optional fallback generation with a per-provider timeout.
///
/// The fallback is tried exactly once, and only after the primary fails or
/// times out. When both are exhausted the caller gets
/// [`AppError::GeneratorFailed`]; credit compensation is the caller's job.
pub struct FallbackGenerator {
    primary: Box<dyn Generator>,
    fallback: Option<Box<dyn Generator>>,
    timeout: Duration,
}

impl FallbackGenerator {
    /// Wire up the provider pair.
    pub fn new(
        primary: Box<dyn Generator>,
        fallback: Option<Box<dyn Generator>>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout,
        }
    }

    /// Name of the primary provider.
    pub fn primary_name(&self) -> &str {
        self.primary.provider_name()
    }

    async fn try_provider(
        &self,
        generator: &dyn Generator,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<Completion> {
        match tokio::time::timeout(self.timeout, generator.complete(system, user, options)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::AdapterUnavailable {
                adapter: "generator",
                message: format!(
                    "{} timed out after {}s",
                    generator.provider_name(),
                    self.timeout.as_secs()
                ),
                refund_txn_id: None,
            }),
        }
    }

    /// Generate with the primary provider, falling back once.
    ///
    /// Returns the completion together with the name of the provider that
    /// produced it.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<(Completion, String)> {
        match self.try_provider(self.primary.as_ref(), system, user, options).await {
            Ok(completion) => Ok((completion, self.primary.provider_name().to_string())),
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    tracing::error!(error = %primary_err, "Primary generator failed, no fallback configured");
                    return Err(AppError::GeneratorFailed { refund_txn_id: None });
                };
                tracing::warn!(
                    primary = self.primary.provider_name(),
                    fallback = fallback.provider_name(),
                    error = %primary_err,
                    "Primary generator failed, trying fallback"
                );
                match self.try_provider(fallback.as_ref(), system, user, options).await {
                    Ok(completion) => Ok((completion, fallback.provider_name().to_string())),
                    Err(fallback_err) => {
                        tracing::error!(error = %fallback_err, "Fallback generator failed");
                        Err(AppError::GeneratorFailed { refund_txn_id: None })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct ScriptedGenerator {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn provider_name(&self) -> &str {
            self.name
        }

        async fn complete(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerateOptions,
        ) -> Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::AdapterUnavailable {
                    adapter: "generator",
                    message: "down".to_string(),
                    refund_txn_id: None,
                })
            } else {
                Ok(Completion {
                    text: format!("answer from {}", self.name),
                    tokens_in: 10,
                    tokens_out: 5,
                })
            }
        }
    }

    fn scripted(name: &'static str, fail: bool, calls: Arc<AtomicU32>) -> Box<dyn Generator> {
        Box::new(ScriptedGenerator { name, fail, calls })
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary_calls = Arc::new(AtomicU32::new(0));
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let generator = FallbackGenerator::new(
            scripted("primary", false, Arc::clone(&primary_calls)),
            Some(scripted("fallback", false, Arc::clone(&fallback_calls))),
            Duration::from_secs(5),
        );

        let (completion, provider) = generator
            .complete("system", "user", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(provider, "primary");
        assert_eq!(completion.text, "answer from primary");
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_used_exactly_once() {
        let primary_calls = Arc::new(AtomicU32::new(0));
        let fallback_calls = Arc::new(AtomicU32::new(0));
        let generator = FallbackGenerator::new(
            scripted("primary", true, Arc::clone(&primary_calls)),
            Some(scripted("fallback", false, Arc::clone(&fallback_calls))),
            Duration::from_secs(5),
        );

        let (_, provider) = generator
            .complete("system", "user", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(provider, "fallback");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_failing_is_generator_failed() {
        let generator = FallbackGenerator::new(
            scripted("primary", true, Arc::new(AtomicU32::new(0))),
            Some(scripted("fallback", true, Arc::new(AtomicU32::new(0)))),
            Duration::from_secs(5),
        );

        let err = generator
            .complete("system", "user", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GeneratorFailed { .. }));
    }
}
