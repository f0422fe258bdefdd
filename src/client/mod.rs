//! Clients for the downstream enrichment services.
//!
//! Every outbound call goes through [`CallClient`], which wraps one
//! logical POST in the retry/backoff policy and a per-service circuit
//! breaker. The [`Preprocess`] and [`Generate`] traits are the seams the
//! pipeline is tested against.

mod generator;
mod http;
mod preprocessor;

pub use generator::GeneratorClient;
pub use http::CallClient;
pub use preprocessor::PreprocessorClient;

use crate::error::Result;
use crate::events::{GenerationResult, PreprocessResult};
use async_trait::async_trait;

/// Text preprocessing service
#[async_trait]
pub trait Preprocess: Send + Sync {
    async fn preprocess(&self, text: &str) -> Result<PreprocessResult>;
}

/// Artifact generation service
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, clean_text: &str, gen_type: &str) -> Result<GenerationResult>;
}
