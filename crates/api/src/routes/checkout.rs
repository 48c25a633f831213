//! Checkout and payment-confirmation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use checkout::{PaymentConfirmation, PaymentOutcome, ReconcileOutcome};
use common::{IdempotencyKey, Money, OrderId, PaymentIntentId};
use eventlog::EventPublisher;
use idempotency::IdempotencyGuard;
use ledger::LedgerStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::require_user;

// -- Response types --

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub total_cents: i64,
    pub status: String,
}

#[derive(Deserialize)]
pub struct ConfirmPaymentRequest {
    pub intent_id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub outcome: String,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct ConfirmPaymentResponse {
    pub outcome: &'static str,
    pub order_status: Option<String>,
}

// -- Handlers --

/// POST /checkout — convert the caller's cart into a pending order.
///
/// An optional `idempotency-key` header makes retries replay the same
/// receipt; without it the key is derived from the cart contents.
#[tracing::instrument(skip(state, headers))]
pub async fn checkout<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    let user_id = require_user(&headers)?;
    let key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(IdempotencyKey::new);

    let receipt = state.coordinator.checkout(user_id, key).await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_id: receipt.order_id.to_string(),
            total_cents: receipt.total.cents(),
            status: receipt.status.to_string(),
        }),
    ))
}

/// POST /payments/confirm — gateway confirmation intake.
///
/// Replays of the same payment-intent id acknowledge without effect.
#[tracing::instrument(skip(state, req))]
pub async fn confirm_payment<L, G, P>(
    State(state): State<Arc<AppState<L, G, P>>>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, ApiError>
where
    L: LedgerStore + 'static,
    G: IdempotencyGuard + 'static,
    P: EventPublisher + 'static,
{
    if req.intent_id.is_empty() {
        return Err(ApiError::Validation("intent_id is required".to_string()));
    }
    let order_uuid = uuid::Uuid::parse_str(&req.order_id)
        .map_err(|e| ApiError::Validation(format!("invalid order_id: {e}")))?;
    if req.amount_cents < 0 {
        return Err(ApiError::Validation(
            "amount_cents must not be negative".to_string(),
        ));
    }

    let outcome = match req.outcome.as_str() {
        "succeeded" => PaymentOutcome::Succeeded,
        "failed" => PaymentOutcome::Failed {
            reason: req.reason.unwrap_or_else(|| "unspecified".to_string()),
        },
        other => {
            return Err(ApiError::Validation(format!(
                "outcome must be 'succeeded' or 'failed', got '{other}'"
            )));
        }
    };

    let confirmation = PaymentConfirmation {
        intent_id: PaymentIntentId::new(req.intent_id),
        order_id: OrderId::from_uuid(order_uuid),
        amount: Money::from_cents(req.amount_cents),
        outcome,
    };

    let result = state.reconciler.apply(confirmation).await?;

    let response = match result {
        ReconcileOutcome::Applied(status) => ConfirmPaymentResponse {
            outcome: "applied",
            order_status: Some(status.to_string()),
        },
        ReconcileOutcome::AlreadyApplied => ConfirmPaymentResponse {
            outcome: "already_applied",
            order_status: None,
        },
    };

    Ok(Json(response))
}
