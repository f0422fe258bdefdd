//! Broker connection state machine.
//!
//! The broker owns a single connection/channel pair behind a mutex so
//! that channel operations issued by concurrent delivery tasks never race
//! on the underlying transport. Unexpected connection loss is forwarded
//! from lapin's error callback into an mpsc channel; a supervising task
//! owns the reconnect loop and re-declares topology on every reconnect.
//! Topology is expressed as a declaration plan computed from settings, so
//! every (re)connect applies identical arguments and never duplicates
//! exchanges, queues or bindings.

use crate::broker::OutboundPublisher;
use crate::config::BrokerSettings;
use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::retry::BackoffPolicy;
use async_trait::async_trait;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

struct ActiveConnection {
    connection: Connection,
    channel: Channel,
}

/// One idempotent topology operation
#[derive(Debug, Clone, PartialEq)]
enum Declaration {
    Exchange {
        name: String,
        kind: ExchangeKind,
    },
    Queue {
        name: String,
        dead_letter_exchange: Option<String>,
    },
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

/// Exchanges, DLQ and DLQ binding declared on every (re)connect
fn topology_plan(settings: &BrokerSettings) -> Vec<Declaration> {
    vec![
        Declaration::Exchange {
            name: settings.exchange(),
            kind: ExchangeKind::Direct,
        },
        Declaration::Exchange {
            name: settings.dead_letter_exchange.clone(),
            kind: ExchangeKind::Fanout,
        },
        Declaration::Queue {
            name: settings.dead_letter_queue.clone(),
            dead_letter_exchange: None,
        },
        Declaration::Bind {
            queue: settings.dead_letter_queue.clone(),
            exchange: settings.dead_letter_exchange.clone(),
            routing_key: String::new(),
        },
    ]
}

/// Work queue and its binding, declared on every subscribe
fn subscription_plan(settings: &BrokerSettings, queue_name: &str) -> Vec<Declaration> {
    vec![
        Declaration::Queue {
            name: queue_name.to_string(),
            dead_letter_exchange: Some(settings.dead_letter_exchange.clone()),
        },
        Declaration::Bind {
            queue: queue_name.to_string(),
            exchange: settings.exchange(),
            routing_key: queue_name.to_string(),
        },
    ]
}

async fn apply(channel: &Channel, declaration: &Declaration) -> Result<()> {
    match declaration {
        Declaration::Exchange { name, kind } => {
            channel
                .exchange_declare(
                    name,
                    kind.clone(),
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }
        Declaration::Queue {
            name,
            dead_letter_exchange,
        } => {
            let arguments = match dead_letter_exchange {
                Some(dlx) => dead_letter_arguments(dlx),
                None => FieldTable::default(),
            };
            channel
                .queue_declare(
                    name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    arguments,
                )
                .await?;
        }
        Declaration::Bind {
            queue,
            exchange,
            routing_key,
        } => {
            channel
                .queue_bind(
                    queue,
                    exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }
    }
    Ok(())
}

/// Connection to the AMQP broker.
///
/// Cheap to clone; clones share the connection, the shutdown flag and the
/// reconnect supervisor.
#[derive(Clone)]
pub struct Broker {
    settings: BrokerSettings,
    metrics: Metrics,
    inner: Arc<Mutex<Option<ActiveConnection>>>,
    shutdown: Arc<AtomicBool>,
    errors_tx: mpsc::Sender<lapin::Error>,
}

impl Broker {
    /// Create the broker handle and spawn its reconnect supervisor.
    ///
    /// Must be called inside a tokio runtime. The broker starts
    /// disconnected; call [`Broker::connect`] before subscribing.
    pub fn new(settings: BrokerSettings, metrics: Metrics) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(8);

        let broker = Self {
            settings,
            metrics,
            inner: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            errors_tx,
        };

        let supervisor = broker.clone();
        tokio::spawn(async move { supervisor.run_supervisor(errors_rx).await });

        broker
    }

    /// Connect with retry/backoff (5 retries, 1s base delay) and declare
    /// the exchange and dead-letter topology.
    pub async fn connect(&self) -> Result<()> {
        BackoffPolicy::new(5, Duration::from_secs(1))
            .run(|| self.connect_once())
            .await
    }

    async fn connect_once(&self) -> Result<()> {
        let connection =
            Connection::connect(&self.settings.url, ConnectionProperties::default()).await?;

        // Forward transport errors to the supervisor instead of mutating
        // state from inside the callback.
        let errors_tx = self.errors_tx.clone();
        connection.on_error(move |err| {
            let _ = errors_tx.try_send(err);
        });

        let channel = connection.create_channel().await?;
        // Publisher confirms: the publish future resolves only once the
        // broker has accepted the message, never on a bare socket write.
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        channel
            .basic_qos(self.settings.prefetch, BasicQosOptions::default())
            .await?;

        for declaration in topology_plan(&self.settings) {
            apply(&channel, &declaration).await?;
        }

        let mut guard = self.inner.lock().await;
        *guard = Some(ActiveConnection {
            connection,
            channel,
        });

        info!(
            exchange = %self.settings.exchange(),
            dead_letter_queue = %self.settings.dead_letter_queue,
            "broker connected, exchange and DLQ declared"
        );
        Ok(())
    }

    /// Reconnect loop. Connection errors never terminate the process;
    /// reconnects continue until shutdown.
    async fn run_supervisor(&self, mut errors_rx: mpsc::Receiver<lapin::Error>) {
        while let Some(err) = errors_rx.recv().await {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            warn!(error = %err, "broker connection closed unexpectedly, reconnecting");

            loop {
                tokio::time::sleep(self.settings.reconnect_delay()).await;
                if self.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                self.metrics.broker_reconnects_total.inc();
                match self.connect().await {
                    Ok(()) => {
                        info!("broker reconnected");
                        break;
                    }
                    Err(e) => warn!(error = %e, "reconnect failed, will retry"),
                }
            }

            // Drop stale errors from the connection we just replaced
            while errors_rx.try_recv().is_ok() {}
        }
        debug!("broker supervisor exited");
    }

    /// Declare the durable work queue (dead-lettering into the DLX), bind
    /// it to the main exchange under its own name, and start a consumer
    /// with manual acknowledgment.
    pub async fn subscribe(&self, queue_name: &str) -> Result<Consumer> {
        let guard = self.inner.lock().await;
        let active = guard
            .as_ref()
            .ok_or_else(|| AppError::Broker("not connected".to_string()))?;

        for declaration in subscription_plan(&self.settings, queue_name) {
            apply(&active.channel, &declaration).await?;
        }

        let consumer = active
            .channel
            .basic_consume(
                queue_name,
                concat!(env!("CARGO_PKG_NAME"), "-consumer"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = queue_name, "subscribed to queue");
        Ok(consumer)
    }

    /// Publish to the main exchange and wait for the broker's confirm.
    /// No internal retry: retrying a publish after partial processing is
    /// the orchestrator's decision.
    pub async fn publish_message(
        &self,
        routing_key: &str,
        body: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<()> {
        let guard = self.inner.lock().await;
        let active = guard
            .as_ref()
            .ok_or_else(|| AppError::Publish("not connected".to_string()))?;

        let confirmation = active
            .channel
            .basic_publish(
                &self.settings.exchange(),
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_headers(header_table(headers)),
            )
            .await
            .map_err(|e| AppError::Publish(e.to_string()))?
            .await
            .map_err(|e| AppError::Publish(e.to_string()))?;

        confirm_outcome(confirmation)
    }

    /// Publish straight to the dead-letter exchange, bypassing the main
    /// exchange, for messages judged unrecoverable without transport-level
    /// reject semantics.
    pub async fn publish_dead_letter(
        &self,
        body: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Result<()> {
        let guard = self.inner.lock().await;
        let active = guard
            .as_ref()
            .ok_or_else(|| AppError::Publish("not connected".to_string()))?;

        let confirmation = active
            .channel
            .basic_publish(
                &self.settings.dead_letter_exchange,
                "",
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_headers(header_table(headers)),
            )
            .await
            .map_err(|e| AppError::Publish(e.to_string()))?
            .await
            .map_err(|e| AppError::Publish(e.to_string()))?;

        confirm_outcome(confirmation)
    }

    /// Close channel then connection. Idempotent: repeated calls and calls
    /// during an in-flight reconnect are no-ops.
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let mut guard = self.inner.lock().await;
        if let Some(active) = guard.take() {
            if let Err(e) = active.channel.close(200, "shutdown").await {
                debug!(error = %e, "channel close");
            }
            if let Err(e) = active.connection.close(200, "shutdown").await {
                debug!(error = %e, "connection close");
            }
            info!("broker connection closed cleanly");
        }
    }
}

#[async_trait]
impl OutboundPublisher for Broker {
    async fn publish(
        &self,
        routing_key: &str,
        body: Vec<u8>,
        headers: BTreeMap<String, String>,
    ) -> Result<()> {
        self.publish_message(routing_key, &body, &headers).await
    }
}

/// A nacked publish is a failure; the message never reached a queue
fn confirm_outcome(confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Nack(_) => Err(AppError::Publish(
            "broker negatively acknowledged the message".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Queue arguments wiring rejected deliveries into the dead-letter exchange
fn dead_letter_arguments(dead_letter_exchange: &str) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dead_letter_exchange.into()),
    );
    args
}

fn header_table(headers: &BTreeMap<String, String>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(
            key.as_str().into(),
            AMQPValue::LongString(value.as_str().into()),
        );
    }
    table
}
