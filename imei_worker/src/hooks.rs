//! The hooks the worker registers on the engine's events. Result delivery (email, PDF reports) is handled by other
//! services that subscribe to the same events; the worker only records them in its log.
use futures::FutureExt;
use imei_engine::events::{EventHooks, OrderCompletedEvent, OrderFailedEvent, PaymentConfirmedEvent};
use log::*;

pub fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_order_completed(|ev: OrderCompletedEvent| {
            async move {
                let order = &ev.order;
                let risk =
                    order.risk.as_ref().map(|r| format!("{} ({})", r.tier, r.score)).unwrap_or_else(|| "n/a".into());
                let brand = order.brand.map(|b| b.to_string()).unwrap_or_else(|| "unknown brand".into());
                info!("📬️ Order {} for {} verified. {brand}, risk {risk}", order.order_id, order.email);
            }
            .boxed()
        })
        .on_order_failed(|ev: OrderFailedEvent| {
            async move {
                let refund = if ev.refunded { "refunded" } else { "no refund" };
                warn!("📬️ Order {} for {} failed: {} ({refund})", ev.order.order_id, ev.order.email, ev.reason);
            }
            .boxed()
        })
        .on_payment_confirmed(|ev: PaymentConfirmedEvent| {
            async move {
                info!("📬️ Payment received for guest order {} ({})", ev.order.order_id, ev.order.email);
            }
            .boxed()
        });
    hooks
}
