//! Client for the text preprocessing service.

use crate::client::{CallClient, Preprocess};
use crate::error::{AppError, Result};
use crate::events::PreprocessResult;
use crate::metrics::Metrics;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct PreprocessorClient {
    client: CallClient,
    lang: String,
}

impl PreprocessorClient {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        lang: impl Into<String>,
        metrics: Metrics,
    ) -> Result<Self> {
        Ok(Self {
            client: CallClient::new("preprocess", endpoint, timeout, metrics)?,
            lang: lang.into(),
        })
    }
}

#[async_trait]
impl Preprocess for PreprocessorClient {
    /// Expects `{"clean_text": str, "features": object}` back
    async fn preprocess(&self, text: &str) -> Result<PreprocessResult> {
        debug!("calling preprocessing service");
        let payload = json!({
            "text": text,
            "options": {"lang": self.lang},
        });

        let response = self.client.call(&payload).await?;
        serde_json::from_value(response).map_err(|e| AppError::Call {
            service: "preprocess".to_string(),
            message: format!("unexpected response shape: {}", e),
        })
    }
}
