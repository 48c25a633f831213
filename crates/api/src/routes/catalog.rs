//! Catalog endpoints (seeding/admin surface).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::Money;
use eventlog::EventPublisher;
use idempotency::IdempotencyGuard;
use ledger::{LedgerStore, Product};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
}

impl ProductResponse {
    fn from_product(product: Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name,
            description: product.description,
            price_cents: product.price.cents(),
        }
    }
}

/// POST /products — create or replace a product.
#[tracing::instrument(skip(state, req))]
pub async fn create<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    if req.name.is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    if req.price_cents < 0 {
        return Err(ApiError::Validation(
            "price_cents must not be negative".to_string(),
        ));
    }

    let id = req
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("sku-{}", uuid::Uuid::new_v4()));

    let product = Product::new(
        id,
        req.name,
        req.description,
        Money::from_cents(req.price_cents),
    );
    state.ledger.upsert_product(product.clone()).await?;

    Ok((
        StatusCode::CREATED,
        Json(ProductResponse::from_product(product)),
    ))
}

/// GET /products — list the catalog.
#[tracing::instrument(skip(state))]
pub async fn list<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let products = state.ledger.list_products().await?;
    Ok(Json(
        products
            .into_iter()
            .map(ProductResponse::from_product)
            .collect(),
    ))
}

/// GET /products/{id} — one product.
#[tracing::instrument(skip(state))]
pub async fn get<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let product = state
        .ledger
        .get_product(&id.clone().into())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product {id} not found")))?;

    Ok(Json(ProductResponse::from_product(product)))
}

/// DELETE /products/{id} — remove a product from the catalog.
#[tracing::instrument(skip(state))]
pub async fn delete<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let existed = state.ledger.delete_product(&id.clone().into()).await?;
    if !existed {
        return Err(ApiError::NotFound(format!("Product {id} not found")));
    }

    Ok(StatusCode::NO_CONTENT)
}
