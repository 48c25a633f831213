//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use eventlog::EventPublisher;
use idempotency::IdempotencyGuard;
use ledger::{Cart, LedgerStore};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::require_user;

#[derive(serde::Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: Option<u32>,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub items: Vec<CartItemResponse>,
    pub version: i64,
}

impl CartResponse {
    fn from_cart(cart: &Cart) -> Self {
        Self {
            items: cart
                .lines()
                .map(|(product_id, quantity)| CartItemResponse {
                    product_id: product_id.to_string(),
                    quantity,
                })
                .collect(),
            version: cart.version().as_i64(),
        }
    }
}

/// GET /cart — the caller's current cart.
#[tracing::instrument(skip(state, headers))]
pub async fn get_cart<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    headers: HeaderMap,
) -> Result<Json<CartResponse>, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let user_id = require_user(&headers)?;
    let cart = state.ledger.get_cart(user_id).await?;
    Ok(Json(CartResponse::from_cart(&cart)))
}

/// POST /cart/items — add quantity of a product (default 1).
#[tracing::instrument(skip(state, headers, req))]
pub async fn add_item<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    headers: HeaderMap,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let user_id = require_user(&headers)?;

    if req.product_id.is_empty() {
        return Err(ApiError::Validation("product_id is required".to_string()));
    }
    let quantity = req.quantity.unwrap_or(1);
    if quantity == 0 {
        return Err(ApiError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }

    let cart = state
        .ledger
        .add_to_cart(user_id, req.product_id.into(), quantity)
        .await?;

    Ok(Json(CartResponse::from_cart(&cart)))
}

/// DELETE /cart/items/{product_id} — drop one product line.
#[tracing::instrument(skip(state, headers))]
pub async fn remove_item<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let user_id = require_user(&headers)?;
    let cart = state
        .ledger
        .remove_from_cart(user_id, &product_id.into())
        .await?;

    Ok(Json(CartResponse::from_cart(&cart)))
}
