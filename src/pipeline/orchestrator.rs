//! Orchestrates one delivery through validate → preprocess → generate →
//! publish → acknowledge.
//!
//! Every step returns a tagged result; the failure arm carries the stage
//! that failed and a human-readable reason. The orchestrator matches on
//! that tag to decide ack versus reject-without-requeue, so per-message
//! failures never escape as panics or crash the process. The declared
//! dead-letter topology routes every rejected delivery to the DLQ.

use crate::broker::OutboundPublisher;
use crate::client::{Generate, Preprocess};
use crate::error::{AppError, Result};
use crate::events::{Event, OutboundEvent};
use crate::metrics::Metrics;
use crate::schema::SchemaValidator;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Pipeline stage at which a delivery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Validate,
    Preprocess,
    Generate,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Validate => "validate",
            Stage::Preprocess => "preprocess",
            Stage::Generate => "generate",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a delivery is being dead-lettered
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: Stage,
    pub reason: String,
}

impl PipelineFailure {
    fn at(stage: Stage) -> impl FnOnce(AppError) -> Self {
        move |err| Self {
            stage,
            reason: err.to_string(),
        }
    }
}

pub struct Orchestrator {
    validator: Arc<SchemaValidator>,
    preprocessor: Arc<dyn Preprocess>,
    generator: Arc<dyn Generate>,
    publisher: Arc<dyn OutboundPublisher>,
    out_topic: String,
    metrics: Metrics,
}

impl Orchestrator {
    pub fn new(
        validator: Arc<SchemaValidator>,
        preprocessor: Arc<dyn Preprocess>,
        generator: Arc<dyn Generate>,
        publisher: Arc<dyn OutboundPublisher>,
        out_topic: impl Into<String>,
        metrics: Metrics,
    ) -> Self {
        Self {
            validator,
            preprocessor,
            generator,
            publisher,
            out_topic: out_topic.into(),
            metrics,
        }
    }

    /// Drive one payload through the pipeline up to and including publish.
    ///
    /// Steps are strictly sequential; nothing is published unless every
    /// preceding step succeeded, and a publish failure after successful
    /// processing surfaces as a `Publish`-stage failure rather than being
    /// retried indefinitely.
    pub async fn process(&self, payload: &[u8]) -> std::result::Result<OutboundEvent, PipelineFailure> {
        let raw: Value = serde_json::from_slice(payload)
            .map_err(AppError::from)
            .map_err(PipelineFailure::at(Stage::Decode))?;

        self.validator
            .validate(&raw)
            .map_err(PipelineFailure::at(Stage::Validate))?;

        let mut event: Event = serde_json::from_value(raw)
            .map_err(AppError::from)
            .map_err(PipelineFailure::at(Stage::Decode))?;
        event.stamp_received_at(chrono::Utc::now().timestamp_micros() as f64 / 1e6);

        let preprocessed = self
            .preprocessor
            .preprocess(&event.text)
            .await
            .map_err(PipelineFailure::at(Stage::Preprocess))?;

        let generated = self
            .generator
            .generate(&preprocessed.clean_text, &event.generate_type)
            .await
            .map_err(PipelineFailure::at(Stage::Generate))?;

        let outbound = OutboundEvent::new(&event, generated);
        self.publish(&outbound)
            .await
            .map_err(PipelineFailure::at(Stage::Publish))?;

        Ok(outbound)
    }

    async fn publish(&self, outbound: &OutboundEvent) -> Result<()> {
        let body = serde_json::to_vec(outbound)
            .map_err(|e| AppError::Publish(e.to_string()))?;

        let mut headers = BTreeMap::new();
        headers.insert("correlation_id".to_string(), outbound.id.clone());

        self.publisher
            .publish(&self.out_topic, body, headers)
            .await
    }

    /// Process one delivery end to end and settle it.
    ///
    /// Acknowledged only after a confirmed publish; any failure rejects
    /// without requeue so the topology dead-letters the message.
    pub async fn handle(&self, delivery: Delivery) {
        let start = Instant::now();

        match self.process(&delivery.data).await {
            Ok(outbound) => {
                if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                    error!(event_id = %outbound.id, error = %e, "failed to ack delivery");
                    return;
                }
                let elapsed = start.elapsed();
                info!(
                    event_id = %outbound.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "event processed"
                );
                self.metrics.record_message_ok(elapsed);
            }
            Err(failure) => {
                warn!(
                    stage = %failure.stage,
                    reason = %failure.reason,
                    "failed to process message, dead-lettering"
                );
                self.metrics.record_message_failed(failure.stage.as_str());
                if let Err(e) = delivery
                    .acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await
                {
                    error!(error = %e, "failed to reject delivery");
                }
            }
        }
    }
}
