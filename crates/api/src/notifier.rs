//! Notification consumer: simulated customer emails.
//!
//! Stands in for the external notification service. Like any consumer
//! of the log it may see an event more than once; sending the same
//! "email" twice is harmless here, so no dedup state is kept.

use eventlog::OrderEvent;
use tokio::sync::mpsc::UnboundedReceiver;

/// Drains the subscription until the log side closes it.
pub async fn run(mut events: UnboundedReceiver<OrderEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            OrderEvent::OrderCreated {
                order_id,
                user_id,
                total,
                ..
            } => {
                tracing::info!(
                    %order_id,
                    %user_id,
                    %total,
                    "[email] Your order has been received, we'll notify you once payment completes"
                );
            }
            OrderEvent::OrderPaid {
                order_id, amount, ..
            } => {
                tracing::info!(
                    %order_id,
                    %amount,
                    "[email] Payment confirmation: your payment was processed successfully"
                );
            }
            OrderEvent::OrderPaymentFailed {
                order_id, reason, ..
            } => {
                tracing::info!(
                    %order_id,
                    %reason,
                    "[email] Your payment did not go through, please try again"
                );
            }
        }
        metrics::counter!("notifier_emails_sent").increment(1);
    }
}
