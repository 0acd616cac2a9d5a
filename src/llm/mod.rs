//! LLM provider clients and abstractions.

/// Generator trait, provider factory and fallback wiring.
pub mod client;
/// Ollama client.
#[cfg(feature = "ollama")]
pub mod ollama;
/// OpenAI-compatible client.
#[cfg(feature = "openai")]
pub mod openai;

pub use client::{create_generator, Completion, FallbackGenerator, GenerateOptions, Generator};
