//! AMQP broker connection, topology and reconnection handling.

mod connection;

pub use connection::Broker;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Seam for publishing to the outbound exchange.
///
/// The pipeline depends on this trait rather than on the concrete broker
/// so that publish behavior can be stubbed in tests.
#[async_trait]
pub trait OutboundPublisher: Send + Sync {
    async fn publish(
        &self,
        routing_key: &str,
        body: Vec<u8>,
        headers: BTreeMap<String, String>,
    ) -> Result<()>;
}
