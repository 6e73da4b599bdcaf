//! Order submission.
//!
//! A registered user's order is validated, priced, stored and charged in one atomic unit, and then queued. If the
//! queue does not accept it, the charge is refunded and the order removed, so no balance is ever debited for an
//! order that will never run. If that compensation fails too, [`SubmissionError::RollbackFailed`] carries the order
//! reference, and [`OrderSubmissionApi::retry_rollback`] can be called until it succeeds.
//!
//! A guest order is stored with its fixed-fee amount and the payment session it belongs to. It is only queued once
//! the payment is confirmed (see [`crate::engine_api::payment_reconciler::PaymentReconciler`]).
use std::fmt::Debug;

use log::*;

use crate::{
    brands::Brand,
    db_types::{Imei, JobPayload, NewCreditTransaction, NewOrder, Order, TransactionType, UserId},
    engine_api::{errors::SubmissionError, job_queue::JobSink, ledger_api::rollback_key},
    pricing::{GuestPricing, PricingSource},
    traits::{InsertOrderResult, LedgerManagement, OrderManagement},
};

/// A verification request from a registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub user_id: UserId,
    pub imei: String,
    /// The brand the user picked, if any. The verification may find a different one.
    pub brand: Option<Brand>,
    pub addon_ids: Vec<u16>,
    pub language: String,
}

impl VerificationRequest {
    pub fn new(user_id: UserId, imei: impl Into<String>) -> Self {
        Self { user_id, imei: imei.into(), brand: None, addon_ids: Vec::new(), language: "en".to_string() }
    }

    pub fn with_brand(mut self, brand: Brand) -> Self {
        self.brand = Some(brand);
        self
    }

    pub fn with_addons(mut self, addon_ids: Vec<u16>) -> Self {
        self.addon_ids = addon_ids;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// A verification request from a guest, paid for through a payment session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestRequest {
    pub email: String,
    pub imei: String,
    /// The brand as entered by the guest. It must name a known brand.
    pub brand: String,
    pub addon_ids: Vec<u16>,
    pub session_id: String,
    pub language: String,
}

impl GuestRequest {
    pub fn new(
        email: impl Into<String>,
        imei: impl Into<String>,
        brand: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            imei: imei.into(),
            brand: brand.into(),
            addon_ids: Vec::new(),
            session_id: session_id.into(),
            language: "en".to_string(),
        }
    }

    pub fn with_addons(mut self, addon_ids: Vec<u16>) -> Self {
        self.addon_ids = addon_ids;
        self
    }
}

pub struct OrderSubmissionApi<B, S, Q> {
    db: B,
    pricing: S,
    queue: Q,
    guest_pricing: GuestPricing,
}

impl<B: Debug, S, Q> Debug for OrderSubmissionApi<B, S, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderSubmissionApi ({:?})", self.db)
    }
}

impl<B, S, Q> OrderSubmissionApi<B, S, Q> {
    pub fn new(db: B, pricing: S, queue: Q) -> Self {
        Self { db, pricing, queue, guest_pricing: GuestPricing::default() }
    }

    pub fn with_guest_pricing(mut self, guest_pricing: GuestPricing) -> Self {
        self.guest_pricing = guest_pricing;
        self
    }
}

impl<B, S, Q> OrderSubmissionApi<B, S, Q>
where
    B: OrderManagement + LedgerManagement,
    S: PricingSource,
    Q: JobSink,
{
    /// Submits an order for a registered user. The order's price is debited from the user's balance.
    pub async fn submit(&self, request: VerificationRequest) -> Result<Order, SubmissionError> {
        let imei = Imei::parse(&request.imei)?;
        let user_id = request.user_id;
        let account = self
            .db
            .fetch_user_account(user_id)
            .await
            .map_err(db_error)?
            .ok_or(SubmissionError::AccountNotFound(user_id))?;
        let price = self.pricing.total_price(request.brand, &request.addon_ids).await?;
        let new_order = NewOrder::new(imei.clone(), account.email, price)
            .for_user(user_id)
            .with_brand(request.brand)
            .with_addons(request.addon_ids)
            .with_language(request.language);
        let debit = NewCreditTransaction::new(user_id, TransactionType::Usage, -price, format!("Verification of {imei}"));
        let order = match self.db.insert_order(new_order, Some(debit)).await.map_err(db_error)? {
            InsertOrderResult::Inserted(order) => order,
            InsertOrderResult::InsufficientFunds { balance, required } => {
                info!("📥️ {user_id} cannot pay {required} for {imei}. Balance is {balance}.");
                return Err(SubmissionError::InsufficientFunds { balance, required });
            },
        };
        info!("📥️ Order {} for {imei} submitted by {user_id} at {price}", order.order_id);
        if let Err(e) = self.queue.enqueue(JobPayload::from(&order)).await {
            error!("📥️ Order {} could not be queued: {e}. Rolling it back.", order.order_id);
            return match self.roll_back(&order).await {
                Ok(_) => Err(SubmissionError::EnqueueFailed(e.to_string())),
                Err(reason) => {
                    error!("📥️ Order {} could not be rolled back: {reason}", order.order_id);
                    Err(SubmissionError::RollbackFailed { order_ref: order.id, enqueue_error: e.to_string(), reason })
                },
            };
        }
        Ok(order)
    }

    /// Stores a guest order awaiting payment. The order is not queued until the payment is confirmed.
    pub async fn submit_guest(&self, request: GuestRequest) -> Result<Order, SubmissionError> {
        let imei = Imei::parse(&request.imei)?;
        let brand = Brand::normalize(&request.brand).ok_or_else(|| SubmissionError::UnknownBrand(request.brand.clone()))?;
        let price = self.pricing.total_price(Some(brand), &request.addon_ids).await?;
        let amount = self.guest_pricing.amount_for(price);
        let new_order = NewOrder::new(imei.clone(), request.email, price)
            .with_brand(Some(brand))
            .with_addons(request.addon_ids)
            .with_language(request.language)
            .with_guest_payment(amount, self.guest_pricing.currency.clone(), request.session_id);
        match self.db.insert_order(new_order, None).await.map_err(db_error)? {
            InsertOrderResult::Inserted(order) => {
                info!(
                    "📥️ Guest order {} for {imei} awaits payment of {amount} {}",
                    order.order_id, self.guest_pricing.currency
                );
                Ok(order)
            },
            InsertOrderResult::InsufficientFunds { balance, required } => {
                Err(SubmissionError::InsufficientFunds { balance, required })
            },
        }
    }

    /// Repeats the compensation for an order whose rollback failed after it could not be queued. Returns false if the
    /// order no longer exists. The refund is keyed by the order, so it is never paid twice.
    pub async fn retry_rollback(&self, order_ref: i64) -> Result<bool, SubmissionError> {
        let Some(order) = self.db.fetch_order(order_ref).await.map_err(db_error)? else {
            debug!("📥️ Order #{order_ref} is already gone. Nothing to roll back.");
            return Ok(false);
        };
        self.roll_back(&order).await.map_err(SubmissionError::DatabaseError)
    }

    async fn roll_back(&self, order: &Order) -> Result<bool, String> {
        let refund = order.user_id.map(|user_id| {
            NewCreditTransaction::new(
                user_id,
                TransactionType::Refund,
                order.price_charged,
                format!("Verification {} could not be queued", order.order_id),
            )
            .for_order(order.id)
            .with_idempotency_key(rollback_key(order.id))
        });
        let deleted = self.db.rollback_order(order.id, refund).await.map_err(|e| e.to_string())?;
        debug!("📥️ Order {} rolled back", order.order_id);
        Ok(deleted)
    }
}

fn db_error<E: std::error::Error>(e: E) -> SubmissionError {
    SubmissionError::DatabaseError(e.to_string())
}
