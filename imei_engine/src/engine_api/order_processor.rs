//! # Order processor
//!
//! Runs the verification for one queued order and moves it into exactly one terminal state.
//!
//! For every job the processor:
//! 1. Loads the order. A missing or already terminal order is left alone, so a redelivered job is harmless.
//! 2. Refuses to run a guest order whose payment is not confirmed. The order fails with `payment_incomplete`.
//! 3. Runs the full lookup through the [`Gateway`].
//! 4. Reprices the order for the brand that was actually resolved. A registered user's balance is trued up by an
//!    adjustment entry; a guest's displayed amount is recomputed.
//! 5. Builds the device report and the risk assessment, and stores everything together with the adjustment.
//!
//! When the lookup is exhausted, the order fails and a registered user gets the full charged price back. The status
//! change and the refund are written atomically, and the refund is keyed by the order, so it is paid at most once.
//!
//! Any other error is returned to the job queue, which retries the job. Once the retries are used up,
//! [`OrderProcessor::fail_with_error`] marks the order `error` and refunds it.
use std::fmt::Debug;

use imei_common::Credits;
use log::*;

use crate::{
    brands::Brand,
    db_types::{
        FinalizeResult,
        Job,
        JobPayload,
        NewCreditTransaction,
        Order,
        OrderCompletion,
        OrderStatusType,
        PaymentStatus,
        TransactionType,
    },
    engine_api::{
        errors::OrderProcessorError,
        job_queue::JobHandler,
        ledger_api::{adjustment_key, refund_entry},
    },
    events::{EventProducers, OrderCompletedEvent, OrderFailedEvent},
    gateway::{Gateway, LookupOutcome, LookupProvider},
    pricing::{GuestPricing, PricingError, PricingSource},
    reports::DeviceReport,
    risk::{assess, RiskConfig, RiskSignals},
    traits::OrderManagement,
};

/// Failure reason recorded when a guest order reaches the processor without a confirmed payment.
pub const PAYMENT_INCOMPLETE: &str = "payment_incomplete";

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// The order no longer exists
    Missing,
    /// The order was already terminal. Nothing was done.
    AlreadyFinal(OrderStatusType),
    Completed(Order),
    Failed(Order),
}

pub struct OrderProcessor<B, P, S> {
    db: B,
    gateway: Gateway<P>,
    pricing: S,
    risk: RiskConfig,
    guest_pricing: GuestPricing,
    producers: EventProducers,
}

impl<B: Debug, P, S> Debug for OrderProcessor<B, P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderProcessor ({:?})", self.db)
    }
}

impl<B, P, S> OrderProcessor<B, P, S> {
    pub fn new(db: B, gateway: Gateway<P>, pricing: S, producers: EventProducers) -> Self {
        Self { db, gateway, pricing, risk: RiskConfig::default(), guest_pricing: GuestPricing::default(), producers }
    }

    pub fn with_risk_config(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_guest_pricing(mut self, guest_pricing: GuestPricing) -> Self {
        self.guest_pricing = guest_pricing;
        self
    }
}

impl<B, P, S> OrderProcessor<B, P, S>
where
    B: OrderManagement,
    P: LookupProvider,
    S: PricingSource,
{
    pub async fn process(&self, payload: &JobPayload) -> Result<ProcessOutcome, OrderProcessorError> {
        let Some(order) = self.db.fetch_order(payload.order_ref).await.map_err(db_error)? else {
            warn!("⚙️ Order {} no longer exists. Skipping its job.", payload.order_id);
            return Ok(ProcessOutcome::Missing);
        };
        if order.status.is_terminal() {
            debug!("⚙️ Order {} is already {}. Nothing to do.", order.order_id, order.status);
            return Ok(ProcessOutcome::AlreadyFinal(order.status));
        }
        if order.is_guest() && order.payment_status != PaymentStatus::Paid {
            warn!("⚙️ Guest order {} reached processing with payment {}", order.order_id, order.payment_status);
            let completion = OrderCompletion::failed(OrderStatusType::Failed, PAYMENT_INCOMPLETE);
            return self.finish(&order, completion).await;
        }
        debug!("⚙️ Verifying {} for order {}", order.imei, order.order_id);
        let outcome = match self.gateway.lookup(&order.imei, order.brand, &order.addon_ids).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("⚙️ Verification of order {} failed: {e}", order.order_id);
                let completion =
                    OrderCompletion::failed(OrderStatusType::Failed, e.to_string()).with_ledger_entry(refund_entry(&order));
                return self.finish(&order, completion).await;
            },
        };
        let completion = self.success_completion(&order, &outcome).await?;
        self.finish(&order, completion).await
    }

    /// Moves the order to `error` and refunds a registered user. Used when every attempt of the order's job failed.
    pub async fn fail_with_error(&self, order_ref: i64, reason: &str) -> Result<ProcessOutcome, OrderProcessorError> {
        let Some(order) = self.db.fetch_order(order_ref).await.map_err(db_error)? else {
            warn!("⚙️ Order #{order_ref} no longer exists, so it cannot be marked as failed");
            return Ok(ProcessOutcome::Missing);
        };
        if order.status.is_terminal() {
            return Ok(ProcessOutcome::AlreadyFinal(order.status));
        }
        let completion = OrderCompletion::failed(OrderStatusType::Error, reason).with_ledger_entry(refund_entry(&order));
        self.finish(&order, completion).await
    }

    async fn success_completion(
        &self,
        order: &Order,
        outcome: &LookupOutcome,
    ) -> Result<OrderCompletion, OrderProcessorError> {
        let brand = outcome.brand;
        let new_price = self.reprice(brand, &order.addon_ids).await?;
        let report = DeviceReport::extract(brand, &outcome.detailed.response);
        let risk = report.facts().map(|facts| assess(&RiskSignals::from(facts), &self.risk));
        let raw_result = serde_json::to_string(outcome).unwrap_or_else(|e| {
            warn!("⚙️ Could not serialize the lookup result for order {}: {e}", order.order_id);
            outcome.raw_text()
        });
        let mut completion = OrderCompletion {
            status: OrderStatusType::Success,
            brand,
            model_name: report.model_name().map(String::from),
            price: None,
            guest_amount: None,
            failure_reason: None,
            raw_result: Some(raw_result),
            report: Some(report),
            risk,
            ledger_entry: None,
        };
        if new_price != order.price_charged {
            match order.user_id {
                Some(user_id) => {
                    let delta = order.price_charged - new_price;
                    info!(
                        "⚙️ Order {} is priced at {new_price} for {} instead of {}. Adjusting the balance by {delta}.",
                        order.order_id,
                        brand_label(brand),
                        order.price_charged
                    );
                    let entry = NewCreditTransaction::new(
                        user_id,
                        TransactionType::Adjustment,
                        delta,
                        format!("Price adjustment for verification {}", order.order_id),
                    )
                    .for_order(order.id)
                    .with_idempotency_key(adjustment_key(order.id));
                    completion.price = Some(new_price);
                    completion.ledger_entry = Some(entry);
                },
                None => {
                    let amount = self.guest_pricing.amount_for(new_price);
                    debug!("⚙️ Guest order {} is shown at {amount} for {}", order.order_id, brand_label(brand));
                    completion.guest_amount = Some(amount);
                },
            }
        }
        Ok(completion)
    }

    /// The price for the resolved brand. Add-ons that the brand does not offer are left out of the new price.
    async fn reprice(&self, brand: Option<Brand>, addon_ids: &[u16]) -> Result<Credits, OrderProcessorError> {
        match self.pricing.total_price(brand, addon_ids).await {
            Ok(price) => Ok(price),
            Err(PricingError::UnknownAddon { .. }) => {
                let offered = self.pricing.additional_services(brand).await?;
                let kept = addon_ids.iter().copied().filter(|id| offered.iter().any(|a| a.id.0 == *id)).collect::<Vec<_>>();
                debug!("⚙️ Only add-ons {kept:?} of {addon_ids:?} are offered for {}", brand_label(brand));
                Ok(self.pricing.total_price(brand, &kept).await?)
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn finish(&self, order: &Order, completion: OrderCompletion) -> Result<ProcessOutcome, OrderProcessorError> {
        let wants_refund = completion.ledger_entry.as_ref().map(|e| e.tx_type == TransactionType::Refund).unwrap_or(false);
        match self.db.finalize_order(order.id, completion).await.map_err(db_error)? {
            FinalizeResult::AlreadyFinal(existing) => {
                debug!("⚙️ Order {} was finalized elsewhere as {}", existing.order_id, existing.status);
                Ok(ProcessOutcome::AlreadyFinal(existing.status))
            },
            FinalizeResult::Finalized { order, ledger_applied } => {
                if order.status == OrderStatusType::Success {
                    info!("⚙️ Order {} completed for {}", order.order_id, order.email);
                    self.producers.publish_order_completed(OrderCompletedEvent::new(order.clone())).await;
                    Ok(ProcessOutcome::Completed(order))
                } else {
                    let refunded = wants_refund && ledger_applied;
                    info!(
                        "⚙️ Order {} ended as {} ({}). Refunded: {refunded}",
                        order.order_id,
                        order.status,
                        order.failure_reason.as_deref().unwrap_or("no reason given")
                    );
                    self.producers.publish_order_failed(OrderFailedEvent::new(order.clone(), refunded)).await;
                    Ok(ProcessOutcome::Failed(order))
                }
            },
        }
    }
}

impl<B, P, S> JobHandler for OrderProcessor<B, P, S>
where
    B: OrderManagement,
    P: LookupProvider,
    S: PricingSource + 'static,
{
    type Error = OrderProcessorError;

    async fn handle(&self, job: &Job) -> Result<(), OrderProcessorError> {
        self.process(&job.payload).await.map(|_| ())
    }

    async fn on_exhausted(&self, job: &Job, error: &str) {
        if let Err(e) = self.fail_with_error(job.order_ref, error).await {
            error!("⚙️ Order {} could not be marked as failed after its job died: {e}", job.payload.order_id);
        }
    }
}

fn brand_label(brand: Option<Brand>) -> &'static str {
    brand.map(|b| b.as_str()).unwrap_or("an unknown brand")
}

fn db_error<E: std::error::Error>(e: E) -> OrderProcessorError {
    OrderProcessorError::DatabaseError(e.to_string())
}
