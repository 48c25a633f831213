//! API server entry point.

use std::sync::Arc;

use api::{AppState, config::Config};
use checkout::{CheckoutCoordinator, PaymentReconciler};
use eventlog::{PostgresEventLog, PostgresOutbox, RetryingPublisher};
use idempotency::PostgresGuard;
use ledger::PostgresLedger;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Spawns the periodic outbox sweep for a publisher handle.
fn spawn_sweep<P, O>(publisher: RetryingPublisher<P, O>, interval: std::time::Duration)
where
    P: eventlog::EventPublisher + 'static,
    O: eventlog::Outbox + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = publisher.sweep(100).await {
                tracing::warn!(error = %e, "outbox sweep failed");
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = Config::from_env();

    // 3. Wire stores: PostgreSQL when DATABASE_URL is set, in-memory
    //    otherwise (demo mode, state dies with the process).
    let app = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to database");

            let ledger = PostgresLedger::new(pool.clone());
            ledger.run_migrations().await.expect("migrations failed");

            let guard = PostgresGuard::new(pool.clone());
            let log = PostgresEventLog::new(pool.clone());
            let outbox = PostgresOutbox::new(pool);
            let publisher = RetryingPublisher::new(log, outbox);

            spawn_sweep(publisher.clone(), config.outbox_sweep_interval);

            let state = Arc::new(AppState {
                coordinator: CheckoutCoordinator::new(
                    ledger.clone(),
                    guard.clone(),
                    publisher.clone(),
                ),
                reconciler: PaymentReconciler::new(ledger.clone(), guard, publisher),
                ledger,
            });

            tracing::info!("using PostgreSQL stores");
            api::create_app(state, metrics_handle)
        }
        None => {
            let (state, log, publisher) = api::create_memory_state();

            spawn_sweep(publisher, config.outbox_sweep_interval);

            // Simulated notification emails off the in-process log. A
            // PostgreSQL deployment feeds notification via CDC instead.
            let subscription = log.subscribe().await;
            tokio::spawn(api::notifier::run(subscription));

            tracing::info!("using in-memory stores");
            api::create_app(state, metrics_handle)
        }
    };

    // 4. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
