//! Billing Relay - Main Entry Point
//!
//! HTTP intake for billing requests, a RabbitMQ-backed payment worker and a
//! daily subscription scan.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use billing_relay::api::{self, AppState};
use billing_relay::auth::GrpcUserVerifier;
use billing_relay::jobs::PublishDispatcher;
use billing_relay::payment::{PaymentGateway, SimulatedGateway, StripeGateway};
use billing_relay::scheduler::{DailyScan, HttpPaymentCaller, InMemorySubscriptionStore};
use billing_relay::{AmqpBroker, BillingProcessor, BillingWorker, RelayConfig, WorkerHandle};

/// Pending publish jobs the intake endpoint may queue before refusing.
const DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// How long shutdown waits for queued publishes.
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "billing_relay=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = RelayConfig::from_env().context("Failed to load configuration")?;

    info!("Starting Billing Relay v{}", env!("CARGO_PKG_VERSION"));
    info!(host = %config.rabbitmq_host, "Broker configured");

    // Broker
    let broker = Arc::new(AmqpBroker::new(&config));

    // Payment worker
    let gateway: Arc<dyn PaymentGateway> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeGateway::new(&config.stripe_api_base, key)?),
        None => Arc::new(SimulatedGateway::new()),
    };
    info!(gateway = gateway.name(), "Payment gateway selected");

    let mut processor = BillingProcessor::new(gateway);
    if config.auth_service_enabled {
        let uri = config.auth_service_uri();
        info!(uri = %uri, "User verification enabled");
        processor = processor.with_verifier(Arc::new(GrpcUserVerifier::new(&uri)?));
    }

    let shutdown = CancellationToken::new();
    let worker = BillingWorker::new(broker.clone(), Arc::new(processor), shutdown.child_token())
        .with_backoff(config.reconnect_backoff());
    let worker_handle = WorkerHandle::start(worker);

    // Daily subscription scan
    let subscriptions = Arc::new(InMemorySubscriptionStore::new());
    let scan = DailyScan::new(
        subscriptions.clone(),
        Arc::new(HttpPaymentCaller::new(&config.payment_endpoint_url)?),
        config.scan_interval(),
    );
    let scan_token = shutdown.child_token();
    let scan_handle = WorkerHandle::spawn("daily-scan", scan_token.clone(), scan.run(scan_token));

    // Intake publishing
    let (dispatcher, dispatcher_handle) = PublishDispatcher::new(broker.clone(), DISPATCH_QUEUE_CAPACITY);
    let dispatcher_task = tokio::spawn(dispatcher_handle.run());

    let state = Arc::new(AppState {
        dispatcher,
        health: broker,
        subscriptions,
    });
    let app = api::router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last dispatcher, so the task drains and exits
    info!("HTTP server stopped, shutting down background tasks");
    if tokio::time::timeout(DISPATCH_DRAIN_TIMEOUT, dispatcher_task).await.is_err() {
        warn!("Publish dispatcher did not drain in time");
    }
    shutdown.cancel();
    worker_handle.stop().await;
    scan_handle.stop().await;

    info!("Billing Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
