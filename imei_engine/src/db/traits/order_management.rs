use std::future::Future;

use crate::{
    db_types::{FinalizeResult, NewCreditTransaction, NewOrder, Order, OrderCompletion, OrderId, PaymentStatus, UserId},
    traits::{InsertOrderResult, VerificationDatabase},
};

/// The `OrderManagement` trait defines how orders are stored and how their state changes are persisted.
pub trait OrderManagement: VerificationDatabase {
    /// Stores a new `pending/pending` order. A fresh external order number is allocated by the backend.
    ///
    /// If `debit` is given, it is applied to the ledger in the same atomic unit, linked to the new order. When the
    /// balance cannot cover it, nothing is stored and [`InsertOrderResult::InsufficientFunds`] is returned.
    fn insert_order(
        &self,
        order: NewOrder,
        debit: Option<NewCreditTransaction>,
    ) -> impl Future<Output = Result<InsertOrderResult, Self::Error>> + Send;

    /// Fetches an order by its internal id
    fn fetch_order(&self, id: i64) -> impl Future<Output = Result<Option<Order>, Self::Error>> + Send;

    fn fetch_order_by_order_id(
        &self,
        order_id: &OrderId,
    ) -> impl Future<Output = Result<Option<Order>, Self::Error>> + Send;

    fn fetch_order_by_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<Order>, Self::Error>> + Send;

    fn fetch_orders_for_user(&self, user_id: UserId) -> impl Future<Output = Result<Vec<Order>, Self::Error>> + Send;

    /// Atomically applies the compensating `refund` (if any) and deletes the order. Returns false if the order did
    /// not exist.
    fn rollback_order(
        &self,
        id: i64,
        refund: Option<NewCreditTransaction>,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Moves the payment status from `from` to `to`. The change only happens if the current payment status is `from`
    /// and the order is still pending. When `failure_reason` is given, the order status becomes `failed` as well.
    ///
    /// Returns the updated order, or `None` if the transition did not apply.
    fn update_payment_status(
        &self,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> impl Future<Output = Result<Option<Order>, Self::Error>> + Send;

    /// Moves a pending order into a terminal state and applies the completion's ledger entry, in one atomic unit.
    ///
    /// * If the order is already terminal, nothing is written and [`FinalizeResult::AlreadyFinal`] is returned.
    /// * A ledger entry that was already applied (same idempotency key) is skipped.
    /// * An adjustment the balance cannot cover is skipped, and the order price is left unchanged.
    fn finalize_order(
        &self,
        id: i64,
        completion: OrderCompletion,
    ) -> impl Future<Output = Result<FinalizeResult, Self::Error>> + Send;
}
