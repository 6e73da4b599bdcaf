//! Credit balances and the append-only ledger behind them.
//!
//! Every change to a balance goes through [`LedgerManagement::apply_transaction`], which appends the entry and moves
//! the balance in one atomic unit. The balance can therefore always be recomputed from the ledger, and
//! [`LedgerApi::audit`] does exactly that.
use std::fmt::Debug;

use imei_common::Credits;
use log::*;

use crate::{
    db_types::{CreditTransaction, LedgerUpdate, NewCreditTransaction, Order, TransactionType, UserAccount, UserId},
    engine_api::errors::LedgerError,
    traits::LedgerManagement,
};

/// Ledger key of the refund written when an order fails.
pub fn refund_key(order_ref: i64) -> String {
    format!("refund:order-{order_ref}")
}

/// Ledger key of the price true-up written when an order completes.
pub fn adjustment_key(order_ref: i64) -> String {
    format!("adjust:order-{order_ref}")
}

/// Ledger key of the refund written when a freshly submitted order could not be queued.
pub fn rollback_key(order_ref: i64) -> String {
    format!("rollback:order-{order_ref}")
}

/// The refund owed for a failed order: the full price that was charged at submission. Guest orders never touch the
/// ledger, so they get `None`.
pub fn refund_entry(order: &Order) -> Option<NewCreditTransaction> {
    let user_id = order.user_id?;
    let entry = NewCreditTransaction::new(
        user_id,
        TransactionType::Refund,
        order.price_charged,
        format!("Refund for verification {}", order.order_id),
    )
    .for_order(order.id)
    .with_idempotency_key(refund_key(order.id));
    Some(entry)
}

#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseResult {
    /// The purchase was credited now
    Credited(CreditTransaction),
    /// The payment intent had been credited before. The original entry is returned.
    AlreadyProcessed(CreditTransaction),
}

impl PurchaseResult {
    pub fn transaction(&self) -> &CreditTransaction {
        match self {
            PurchaseResult::Credited(tx) | PurchaseResult::AlreadyProcessed(tx) => tx,
        }
    }
}

/// A comparison of the stored balance against the sum of the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerAudit {
    pub user_id: UserId,
    pub balance: Credits,
    pub ledger_sum: Credits,
    pub entries: usize,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum
    }
}

pub struct LedgerApi<B> {
    db: B,
}

impl<B: Debug> Debug for LedgerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi ({:?})", self.db)
    }
}

impl<B> LedgerApi<B>
where B: LedgerManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Fetches the account for the email address, creating an empty one if there is none yet.
    pub async fn account_for_email(&self, email: &str) -> Result<UserAccount, LedgerError> {
        self.db.fetch_or_create_user(email).await.map_err(db_error)
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Credits, LedgerError> {
        let account = self.account(user_id).await?;
        Ok(account.balance)
    }

    /// The user's ledger, oldest entry first.
    pub async fn history(&self, user_id: UserId) -> Result<Vec<CreditTransaction>, LedgerError> {
        self.db.fetch_transactions(user_id).await.map_err(db_error)
    }

    /// Every ledger entry that refers to the given order, oldest first: the debit, and any adjustment or refund.
    pub async fn order_history(&self, order_ref: i64) -> Result<Vec<CreditTransaction>, LedgerError> {
        self.db.fetch_transactions_for_order(order_ref).await.map_err(db_error)
    }

    pub async fn audit(&self, user_id: UserId) -> Result<LedgerAudit, LedgerError> {
        let account = self.account(user_id).await?;
        let history = self.history(user_id).await?;
        let ledger_sum = history.iter().map(|tx| tx.amount).sum::<Credits>();
        let audit = LedgerAudit { user_id, balance: account.balance, ledger_sum, entries: history.len() };
        if !audit.is_consistent() {
            error!(
                "💳️ Balance of account {user_id} is {} but its {} ledger entries sum to {ledger_sum}",
                account.balance, audit.entries
            );
        }
        Ok(audit)
    }

    /// Spends `amount` credits. Fails without side effects if the balance cannot cover it.
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Credits,
        description: &str,
        order_ref: Option<i64>,
    ) -> Result<CreditTransaction, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut entry = NewCreditTransaction::new(user_id, TransactionType::Usage, -amount, description);
        entry.order_ref = order_ref;
        self.apply(entry).await
    }

    /// Adds `amount` credits to the balance. `tx_type` says where they came from, and cannot be `Usage`.
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Credits,
        description: &str,
        order_ref: Option<i64>,
        tx_type: TransactionType,
    ) -> Result<CreditTransaction, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if tx_type == TransactionType::Usage {
            return Err(LedgerError::InvalidTransactionType(tx_type.to_string()));
        }
        let mut entry = NewCreditTransaction::new(user_id, tx_type, amount, description);
        entry.order_ref = order_ref;
        self.apply(entry).await
    }

    /// Credits a completed purchase. The payment intent id is the deduplication key: a second call with the same id
    /// credits nothing and returns the original entry.
    pub async fn credit_purchase(
        &self,
        user_id: UserId,
        payment_intent_id: &str,
        credits: Credits,
    ) -> Result<PurchaseResult, LedgerError> {
        if !credits.is_positive() {
            return Err(LedgerError::InvalidAmount(credits));
        }
        if let Some(existing) = self.db.fetch_transaction_by_external_ref(payment_intent_id).await.map_err(db_error)? {
            info!("💳️ Payment intent {payment_intent_id} was already credited in entry #{}", existing.id);
            return Ok(PurchaseResult::AlreadyProcessed(existing));
        }
        // The account must exist before anything is credited to it
        self.account(user_id).await?;
        let entry = NewCreditTransaction::new(
            user_id,
            TransactionType::Purchase,
            credits,
            format!("Purchase of {credits}"),
        )
        .with_external_ref(payment_intent_id);
        match self.db.apply_transaction(entry).await.map_err(db_error)? {
            LedgerUpdate::Applied(tx) => {
                info!("💳️ {credits} credited to account {user_id} for payment intent {payment_intent_id}");
                Ok(PurchaseResult::Credited(tx))
            },
            // A concurrent delivery of the same confirmation won the race
            LedgerUpdate::Duplicate(tx) => Ok(PurchaseResult::AlreadyProcessed(tx)),
            LedgerUpdate::InsufficientFunds { balance, required } => {
                Err(LedgerError::InsufficientFunds { balance, required })
            },
        }
    }

    async fn account(&self, user_id: UserId) -> Result<UserAccount, LedgerError> {
        self.db.fetch_user_account(user_id).await.map_err(db_error)?.ok_or(LedgerError::AccountNotFound(user_id))
    }

    async fn apply(&self, entry: NewCreditTransaction) -> Result<CreditTransaction, LedgerError> {
        let user_id = entry.user_id;
        self.account(user_id).await?;
        match self.db.apply_transaction(entry).await.map_err(db_error)? {
            LedgerUpdate::Applied(tx) => {
                debug!("💳️ {} {} applied to account {user_id}", tx.tx_type, tx.amount);
                Ok(tx)
            },
            LedgerUpdate::Duplicate(tx) => Ok(tx),
            LedgerUpdate::InsufficientFunds { balance, required } => {
                info!("💳️ Account {user_id} has {balance}, which does not cover {required}");
                Err(LedgerError::InsufficientFunds { balance, required })
            },
        }
    }
}

fn db_error<E: std::error::Error>(e: E) -> LedgerError {
    LedgerError::DatabaseError(e.to_string())
}
