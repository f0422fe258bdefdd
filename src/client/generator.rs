//! Client for the artifact generation service.

use crate::client::{CallClient, Generate};
use crate::error::{AppError, Result};
use crate::events::GenerationResult;
use crate::metrics::Metrics;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct GeneratorClient {
    client: CallClient,
}

impl GeneratorClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, metrics: Metrics) -> Result<Self> {
        Ok(Self {
            client: CallClient::new("generate", endpoint, timeout, metrics)?,
        })
    }
}

#[async_trait]
impl Generate for GeneratorClient {
    /// Expects `{"url": str, "status": str}` back
    async fn generate(&self, clean_text: &str, gen_type: &str) -> Result<GenerationResult> {
        debug!("calling generation service");
        let payload = json!({
            "clean_text": clean_text,
            "type": gen_type,
        });

        let response = self.client.call(&payload).await?;
        serde_json::from_value(response).map_err(|e| AppError::Call {
            service: "generate".to_string(),
            message: format!("unexpected response shape: {}", e),
        })
    }
}
