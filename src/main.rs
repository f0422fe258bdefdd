use futures::StreamExt;
use music_adapter::{
    api::{build_router, AppState},
    broker::Broker,
    client::{GeneratorClient, PreprocessorClient},
    config::Config,
    metrics::Metrics,
    pipeline::Orchestrator,
    schema::SchemaValidator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "music_adapter=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!("starting music-adapter v{}", env!("CARGO_PKG_VERSION"));

    // Metrics sink, injected into every component that records observations
    let metrics = Metrics::new()?;

    // Health/metrics server
    let app = build_router(AppState::new(metrics.clone()));
    let health_addr = format!("{}:{}", config.server.host, config.server.health_port);
    let listener = tokio::net::TcpListener::bind(&health_addr).await?;
    tracing::info!("health endpoint listening on http://{}", health_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("health server error: {}", e);
        }
    });

    // Broker connection with dead-letter topology
    let broker = Broker::new(config.broker.clone(), metrics.clone());
    broker.connect().await?;

    // Pipeline components
    let validator = Arc::new(SchemaValidator::new(config.schema.path.clone()));
    let preprocessor = Arc::new(PreprocessorClient::new(
        config.services.preprocess_url.clone(),
        config.services.http_timeout(),
        config.services.lang.clone(),
        metrics.clone(),
    )?);
    let generator = Arc::new(GeneratorClient::new(
        config.services.generation_url.clone(),
        config.services.http_timeout(),
        metrics.clone(),
    )?);
    let orchestrator = Arc::new(Orchestrator::new(
        validator,
        preprocessor,
        generator,
        Arc::new(broker.clone()),
        config.broker.out_topic.clone(),
        metrics.clone(),
    ));

    let in_topic = config.broker.in_topic.clone();
    let reconnect_delay = config.broker.reconnect_delay();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // One task per in-flight delivery, bounded by the broker prefetch
    let mut tasks: JoinSet<()> = JoinSet::new();

    'run: loop {
        let mut consumer = match broker.subscribe(&in_topic).await {
            Ok(consumer) => consumer,
            Err(e) => {
                tracing::warn!(error = %e, "subscribe failed, retrying");
                tokio::select! {
                    _ = &mut shutdown => break 'run,
                    _ = tokio::time::sleep(reconnect_delay) => continue 'run,
                }
            }
        };
        tracing::info!(queue = %in_topic, "music-adapter is running");

        loop {
            tokio::select! {
                _ = &mut shutdown => break 'run,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        let orchestrator = orchestrator.clone();
                        tasks.spawn(async move { orchestrator.handle(delivery).await });
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "consumer error");
                    }
                    None => {
                        // Connection loss ends the stream; the broker
                        // supervisor reconnects, then we resubscribe.
                        tracing::warn!("consumer stream ended, resubscribing");
                        tokio::select! {
                            _ = &mut shutdown => break 'run,
                            _ = tokio::time::sleep(reconnect_delay) => {}
                        }
                        continue 'run;
                    }
                }
            }
        }
    }

    tracing::info!("shutting down, draining in-flight deliveries");
    while tasks.join_next().await.is_some() {}

    broker.close().await;
    // Grace period so background tasks observe the shutdown instead of
    // reconnecting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
