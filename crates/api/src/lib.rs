//! HTTP surface for the storefront coordination core.
//!
//! Exposes checkout, payment confirmation, and the cart/catalog/order
//! reads and writes those operations depend on, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod notifier;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use checkout::{CheckoutCoordinator, PaymentReconciler};
use eventlog::{EventLog, EventPublisher, MemoryOutbox, RetryingPublisher};
use idempotency::{IdempotencyGuard, MemoryGuard};
use ledger::{LedgerStore, MemoryLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<L, G, P> {
    pub coordinator: CheckoutCoordinator<L, G, P>,
    pub reconciler: PaymentReconciler<L, G, P>,
    pub ledger: L,
}

/// The publisher the in-memory wiring uses.
pub type MemoryPublisher = RetryingPublisher<EventLog, MemoryOutbox>;

/// Fully in-memory application state.
pub type MemoryAppState = AppState<MemoryLedger, MemoryGuard, MemoryPublisher>;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L, G, P>(
    state: Arc<AppState<L, G, P>>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::checkout::<L, G, P>))
        .route(
            "/payments/confirm",
            post(routes::checkout::confirm_payment::<L, G, P>),
        )
        .route("/cart", get(routes::cart::get_cart::<L, G, P>))
        .route("/cart/items", post(routes::cart::add_item::<L, G, P>))
        .route(
            "/cart/items/{product_id}",
            delete(routes::cart::remove_item::<L, G, P>),
        )
        .route(
            "/products",
            post(routes::catalog::create::<L, G, P>).get(routes::catalog::list::<L, G, P>),
        )
        .route(
            "/products/{id}",
            get(routes::catalog::get::<L, G, P>).delete(routes::catalog::delete::<L, G, P>),
        )
        .route("/orders", get(routes::orders::list::<L, G, P>))
        .route("/orders/{id}", get(routes::orders::get::<L, G, P>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates fully in-memory application state.
///
/// Returns the state, the event log (for consumers to subscribe to),
/// and a publisher handle for the outbox sweep task.
pub fn create_memory_state() -> (Arc<MemoryAppState>, EventLog, MemoryPublisher) {
    let ledger = MemoryLedger::new();
    let guard = MemoryGuard::new();
    let log = EventLog::new();
    let outbox = MemoryOutbox::new();
    let publisher = RetryingPublisher::new(log.clone(), outbox);

    let state = Arc::new(AppState {
        coordinator: CheckoutCoordinator::new(
            ledger.clone(),
            guard.clone(),
            publisher.clone(),
        ),
        reconciler: PaymentReconciler::new(ledger.clone(), guard, publisher.clone()),
        ledger,
    });

    (state, log, publisher)
}
