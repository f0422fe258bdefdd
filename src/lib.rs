//! Queue-driven enrichment adapter.
//!
//! Consumes raw music events from an AMQP queue, enriches each event by
//! calling the preprocessing and generation services in sequence, and
//! republishes the transformed result. Guarantees at-least-once delivery,
//! bounded retry with backoff, circuit breaking on outbound calls, and
//! dead-lettering of poison messages.

pub mod api;
pub mod broker;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod schema;
