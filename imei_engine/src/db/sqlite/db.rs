use std::fmt::Debug;

use chrono::{DateTime, Utc};
use imei_common::Credits;
use log::*;
use sqlx::{migrate, SqlitePool};

use super::{db_url, jobs, new_pool, orders, prices, transactions, user_accounts, SqliteDatabaseError};
use crate::{
    db_types::{
        CreditTransaction,
        FinalizeResult,
        Job,
        JobPayload,
        JobStats,
        LedgerUpdate,
        NewCreditTransaction,
        NewOrder,
        Order,
        OrderCompletion,
        OrderId,
        PaymentStatus,
        PriceOverride,
        TransactionType,
        UserAccount,
        UserId,
    },
    traits::{
        InsertJobResult,
        InsertOrderResult,
        JobStore,
        LedgerManagement,
        OrderManagement,
        PriceOverrideStore,
        VerificationDatabase,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteDatabase ({})", self.url)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `IMEI_DATABASE_URL`
    pub async fn new(max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<(), SqliteDatabaseError> {
        migrate!("./src/db/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl VerificationDatabase for SqliteDatabase {
    type Error = SqliteDatabaseError;

    fn url(&self) -> &str {
        self.url.as_str()
    }
}

impl OrderManagement for SqliteDatabase {
    async fn insert_order(
        &self,
        order: NewOrder,
        debit: Option<NewCreditTransaction>,
    ) -> Result<InsertOrderResult, SqliteDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::insert_order(order, &mut tx).await?;
        if let Some(debit) = debit {
            match transactions::apply_transaction(debit.for_order(order.id), &mut tx).await? {
                LedgerUpdate::Applied(entry) => {
                    debug!("🗃️ Order {} stored and {} debited", order.order_id, -entry.amount);
                },
                LedgerUpdate::InsufficientFunds { balance, required } => {
                    // Dropping the transaction discards the order insert
                    return Ok(InsertOrderResult::InsufficientFunds { balance, required });
                },
                LedgerUpdate::Duplicate(entry) => {
                    return Err(SqliteDatabaseError::QueryError(format!(
                        "The debit for new order {} collides with ledger entry #{}",
                        order.order_id, entry.id
                    )));
                },
            }
        }
        tx.commit().await?;
        Ok(InsertOrderResult::Inserted(order))
    }

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(id, &mut conn).await
    }

    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_order_id(order_id, &mut conn).await
    }

    async fn fetch_order_by_session(&self, session_id: &str) -> Result<Option<Order>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_session(session_id, &mut conn).await
    }

    async fn fetch_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_orders_for_user(user_id, &mut conn).await
    }

    async fn rollback_order(&self, id: i64, refund: Option<NewCreditTransaction>) -> Result<bool, SqliteDatabaseError> {
        let mut tx = self.pool.begin().await?;
        if let Some(refund) = refund {
            let update = transactions::apply_transaction(refund, &mut tx).await?;
            debug!("🗃️ Rollback refund for order {id}: {update:?}");
        }
        let deleted = orders::delete_order(id, &mut tx).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn update_payment_status(
        &self,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> Result<Option<Order>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::update_payment_status(id, from, to, failure_reason, &mut conn).await?;
        match &order {
            Some(_) => debug!("🗃️ Payment status of order {id} changed from {from} to {to}"),
            None => debug!("🗃️ Payment status of order {id} is not {from} (or the order is no longer pending)"),
        }
        Ok(order)
    }

    async fn finalize_order(&self, id: i64, completion: OrderCompletion) -> Result<FinalizeResult, SqliteDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let is_adjustment =
            completion.ledger_entry.as_ref().map(|e| e.tx_type == TransactionType::Adjustment).unwrap_or(false);
        // The new price is only written with the order when no adjustment has to be paid for first
        let direct_price = if is_adjustment { None } else { completion.price };
        let Some(mut order) = orders::finalize_order(id, &completion, direct_price, &mut tx).await? else {
            let existing = orders::fetch_order(id, &mut tx).await?.ok_or(SqliteDatabaseError::OrderNotFound(id))?;
            debug!("🗃️ Order {id} is already {}. Nothing to finalize.", existing.status);
            return Ok(FinalizeResult::AlreadyFinal(existing));
        };
        let mut ledger_applied = false;
        if let Some(entry) = completion.ledger_entry {
            match transactions::apply_transaction(entry, &mut tx).await? {
                LedgerUpdate::Applied(entry) => {
                    ledger_applied = true;
                    debug!("🗃️ Order {id} finalized with ledger entry #{} of {}", entry.id, entry.amount);
                    if is_adjustment {
                        if let Some(price) = completion.price {
                            order = orders::update_price(id, price, &mut tx).await?;
                        }
                    }
                },
                LedgerUpdate::Duplicate(entry) => {
                    debug!("🗃️ Ledger entry #{} for order {id} was applied earlier", entry.id);
                },
                LedgerUpdate::InsufficientFunds { balance, required } => {
                    warn!(
                        "🗃️ Adjustment of {required} for order {id} cannot be covered by a balance of {balance}. \
                         The difference is absorbed and the price stays at {}.",
                        order.price
                    );
                },
            }
        }
        tx.commit().await?;
        Ok(FinalizeResult::Finalized { order, ledger_applied })
    }
}

impl LedgerManagement for SqliteDatabase {
    async fn fetch_or_create_user(&self, email: &str) -> Result<UserAccount, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        user_accounts::fetch_or_create_account(email, &mut conn).await
    }

    async fn fetch_user_account(&self, user_id: UserId) -> Result<Option<UserAccount>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        user_accounts::user_account_by_id(user_id, &mut conn).await
    }

    async fn apply_transaction(&self, entry: NewCreditTransaction) -> Result<LedgerUpdate, SqliteDatabaseError> {
        let mut tx = self.pool.begin().await?;
        let result = transactions::apply_transaction(entry, &mut tx).await?;
        if matches!(result, LedgerUpdate::Applied(_)) {
            tx.commit().await?;
        }
        Ok(result)
    }

    async fn fetch_transactions(&self, user_id: UserId) -> Result<Vec<CreditTransaction>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::fetch_for_user(user_id, &mut conn).await
    }

    async fn fetch_transaction_by_external_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<CreditTransaction>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::fetch_by_external_ref(external_ref, &mut conn).await
    }

    async fn fetch_transactions_for_order(&self, order_ref: i64) -> Result<Vec<CreditTransaction>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        transactions::fetch_for_order(order_ref, &mut conn).await
    }
}

impl JobStore for SqliteDatabase {
    async fn insert_job(
        &self,
        payload: &JobPayload,
        max_attempts: i64,
        run_at: DateTime<Utc>,
    ) -> Result<InsertJobResult, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        jobs::idempotent_insert(payload, max_attempts, run_at, &mut conn).await
    }

    async fn claim_next_job(&self, now: DateTime<Utc>) -> Result<Option<Job>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        jobs::claim_next(now, &mut conn).await
    }

    async fn complete_job(&self, id: i64) -> Result<(), SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        jobs::complete(id, &mut conn).await
    }

    async fn reschedule_job(&self, id: i64, run_at: DateTime<Utc>, error: &str) -> Result<(), SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        jobs::reschedule(id, run_at, error, &mut conn).await
    }

    async fn bury_job(&self, id: i64, error: &str) -> Result<(), SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        jobs::bury(id, error, &mut conn).await
    }

    async fn requeue_stale_jobs(&self, locked_before: DateTime<Utc>) -> Result<u64, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        jobs::requeue_stale(locked_before, &mut conn).await
    }

    async fn fetch_job_by_key(&self, key: &str) -> Result<Option<Job>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        jobs::fetch_by_key(key, &mut conn).await
    }

    async fn job_stats(&self) -> Result<JobStats, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        jobs::stats(&mut conn).await
    }
}

impl PriceOverrideStore for SqliteDatabase {
    type Error = SqliteDatabaseError;

    async fn fetch_price_overrides(&self) -> Result<Vec<PriceOverride>, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        prices::fetch_all(&mut conn).await
    }

    async fn set_price_override(&self, key: &str, price: Credits) -> Result<PriceOverride, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        prices::upsert(key, price, &mut conn).await
    }

    async fn clear_price_override(&self, key: &str) -> Result<bool, SqliteDatabaseError> {
        let mut conn = self.pool.acquire().await?;
        prices::delete(key, &mut conn).await
    }
}
