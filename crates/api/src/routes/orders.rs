//! Order read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use eventlog::EventPublisher;
use idempotency::IdempotencyGuard;
use ledger::{LedgerStore, Order};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::require_user;

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub status: String,
    pub total_cents: i64,
    pub created_at: String,
    pub lines: Vec<OrderLineResponse>,
}

impl OrderResponse {
    fn from_order(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            status: order.status.to_string(),
            total_cents: order.total.cents(),
            created_at: order.created_at.to_rfc3339(),
            lines: order
                .lines
                .into_iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    product_name: line.product_name,
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                })
                .collect(),
        }
    }
}

/// GET /orders — the caller's orders, newest first.
#[tracing::instrument(skip(state, headers))]
pub async fn list<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<OrderResponse>>, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let user_id = require_user(&headers)?;
    let orders = state.ledger.list_orders_for_user(user_id).await?;

    Ok(Json(
        orders.into_iter().map(OrderResponse::from_order).collect(),
    ))
}

/// GET /orders/{id} — one of the caller's orders.
#[tracing::instrument(skip(state, headers))]
pub async fn get<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let user_id = require_user(&headers)?;
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::Validation(format!("invalid order id: {e}")))?;

    let order = state
        .ledger
        .get_order(uuid.into())
        .await?
        // Another user's order reads as absent, not as forbidden.
        .filter(|order| order.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from_order(order)))
}
