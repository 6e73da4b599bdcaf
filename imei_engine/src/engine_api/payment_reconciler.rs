//! Applies payment provider confirmations.
//!
//! Confirmations are delivered at least once, possibly concurrently. Every operation here is safe to repeat:
//! a guest payment moves from `pending` to `paid` with a conditional update, and the job for the order is enqueued
//! idempotently on every delivery, so a delivery that failed half way is completed by the next one. Credit purchases
//! are deduplicated by their payment intent id.
use std::fmt::Debug;

use imei_common::Credits;
use log::*;

use crate::{
    db_types::{JobPayload, Order, PaymentStatus, UserId},
    engine_api::{
        errors::ReconcilerError,
        job_queue::{EnqueueResult, JobSink},
        ledger_api::{LedgerApi, PurchaseResult},
    },
    events::{EventProducers, OrderFailedEvent, PaymentConfirmedEvent},
    traits::{LedgerManagement, OrderManagement},
};

/// Failure reason recorded when the payment provider reports a failed guest payment.
pub const PAYMENT_FAILED: &str = "payment_failed";

#[derive(Debug, Clone, PartialEq)]
pub enum GuestPaymentResult {
    /// The payment is (now) recorded as paid and the order's job is in the queue.
    Confirmed { order: Order, newly_paid: bool, job: EnqueueResult },
    /// The order can no longer be paid for, e.g. because the payment failed earlier. Nothing was changed.
    Ignored(Order),
}

pub struct PaymentReconciler<B, Q> {
    db: B,
    queue: Q,
    ledger: LedgerApi<B>,
    producers: EventProducers,
}

impl<B: Debug, Q> Debug for PaymentReconciler<B, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentReconciler ({:?})", self.db)
    }
}

impl<B, Q> PaymentReconciler<B, Q>
where
    B: OrderManagement + LedgerManagement,
    Q: JobSink,
{
    pub fn new(db: B, queue: Q, producers: EventProducers) -> Self {
        let ledger = LedgerApi::new(db.clone());
        Self { db, queue, ledger, producers }
    }

    /// Records a successful guest payment and queues the order. Repeated deliveries for the same session are no-ops
    /// apart from re-checking that the job is queued.
    pub async fn confirm_guest_payment(&self, session_id: &str) -> Result<GuestPaymentResult, ReconcilerError> {
        let order = self.order_for_session(session_id).await?;
        let (order, newly_paid) = match self
            .db
            .update_payment_status(order.id, PaymentStatus::Pending, PaymentStatus::Paid, None)
            .await
            .map_err(db_error)?
        {
            Some(paid) => {
                info!("💰️ Payment for guest order {} confirmed (session {session_id})", paid.order_id);
                (paid, true)
            },
            None if order.payment_status == PaymentStatus::Paid => {
                debug!("💰️ Payment for guest order {} was confirmed before", order.order_id);
                (order, false)
            },
            None => {
                // Re-read, in case a concurrent delivery moved it in the meantime
                let current = self.order_for_session(session_id).await?;
                if current.payment_status != PaymentStatus::Paid {
                    warn!(
                        "💰️ Guest order {} has payment status {} and status {}. Ignoring the confirmation.",
                        current.order_id, current.payment_status, current.status
                    );
                    return Ok(GuestPaymentResult::Ignored(current));
                }
                (current, false)
            },
        };
        let job =
            self.queue.enqueue(JobPayload::from(&order)).await.map_err(|e| ReconcilerError::EnqueueFailed(e.to_string()))?;
        if newly_paid {
            self.producers.publish_payment_confirmed(PaymentConfirmedEvent::new(order.clone())).await;
        }
        Ok(GuestPaymentResult::Confirmed { order, newly_paid, job })
    }

    /// Records a failed guest payment. The order fails with [`PAYMENT_FAILED`] and is never queued. Returns `None` if
    /// the payment was not pending (already failed, or already paid).
    pub async fn fail_guest_payment(&self, session_id: &str) -> Result<Option<Order>, ReconcilerError> {
        let order = self.order_for_session(session_id).await?;
        let failed = self
            .db
            .update_payment_status(order.id, PaymentStatus::Pending, PaymentStatus::Failed, Some(PAYMENT_FAILED))
            .await
            .map_err(db_error)?;
        match &failed {
            Some(order) => {
                info!("💰️ Payment for guest order {} failed (session {session_id})", order.order_id);
                self.producers.publish_order_failed(OrderFailedEvent::new(order.clone(), false)).await;
            },
            None => debug!("💰️ Payment for guest order {} is {}. Ignoring the failure.", order.order_id, order.payment_status),
        }
        Ok(failed)
    }

    /// Credits a completed credit purchase to the user's balance, once per payment intent.
    pub async fn confirm_credit_purchase(
        &self,
        user_id: UserId,
        payment_intent_id: &str,
        credits: Credits,
    ) -> Result<PurchaseResult, ReconcilerError> {
        let result = self.ledger.credit_purchase(user_id, payment_intent_id, credits).await?;
        if let PurchaseResult::AlreadyProcessed(tx) = &result {
            info!("💰️ Purchase {payment_intent_id} was already credited to {} in entry #{}", tx.user_id, tx.id);
        }
        Ok(result)
    }

    async fn order_for_session(&self, session_id: &str) -> Result<Order, ReconcilerError> {
        self.db
            .fetch_order_by_session(session_id)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ReconcilerError::UnknownSession(session_id.to_string()))
    }
}

fn db_error<E: std::error::Error>(e: E) -> ReconcilerError {
    ReconcilerError::DatabaseError(e.to_string())
}
