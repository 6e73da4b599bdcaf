use chrono::Utc;
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::{user_accounts, SqliteDatabaseError},
    db_types::{CreditTransaction, LedgerUpdate, NewCreditTransaction, UserId},
};

/// Appends a ledger entry and applies it to the user's balance. This is not atomic on its own: call it inside a
/// transaction and pass `&mut *tx`. Nothing is written unless the result is [`LedgerUpdate::Applied`].
pub async fn apply_transaction(
    entry: NewCreditTransaction,
    conn: &mut SqliteConnection,
) -> Result<LedgerUpdate, SqliteDatabaseError> {
    let balance = user_accounts::lock_user_balance(entry.user_id, conn).await?;
    if let Some(existing) = find_duplicate(&entry, conn).await? {
        debug!(
            "💳️ Ledger entry for {} already exists as #{} ({:?}/{:?}). Not applying it again.",
            entry.user_id, existing.id, existing.idempotency_key, existing.external_ref
        );
        return Ok(LedgerUpdate::Duplicate(existing));
    }
    let new_balance = balance + entry.amount;
    if new_balance.is_negative() {
        debug!("💳️ {} cannot cover {} (balance {balance})", entry.user_id, -entry.amount);
        return Ok(LedgerUpdate::InsufficientFunds { balance, required: -entry.amount });
    }
    user_accounts::set_balance(entry.user_id, new_balance, conn).await?;
    let tx = insert_transaction(&entry, new_balance, conn).await?;
    trace!("💳️ {} {} for {}. Balance {balance} -> {new_balance}", entry.tx_type, entry.amount, entry.user_id);
    Ok(LedgerUpdate::Applied(tx))
}

async fn find_duplicate(
    entry: &NewCreditTransaction,
    conn: &mut SqliteConnection,
) -> Result<Option<CreditTransaction>, SqliteDatabaseError> {
    if let Some(key) = &entry.idempotency_key {
        let existing = sqlx::query_as("SELECT * FROM credit_transactions WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
        if existing.is_some() {
            return Ok(existing);
        }
    }
    if let Some(external_ref) = &entry.external_ref {
        return fetch_by_external_ref(external_ref, conn).await;
    }
    Ok(None)
}

async fn insert_transaction(
    entry: &NewCreditTransaction,
    balance_after: imei_common::Credits,
    conn: &mut SqliteConnection,
) -> Result<CreditTransaction, SqliteDatabaseError> {
    let tx = sqlx::query_as(
        r#"
        INSERT INTO credit_transactions (
            user_id, tx_type, amount, balance_after, description, order_ref, external_ref, idempotency_key, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *;
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.tx_type)
    .bind(entry.amount)
    .bind(balance_after)
    .bind(&entry.description)
    .bind(entry.order_ref)
    .bind(&entry.external_ref)
    .bind(&entry.idempotency_key)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(tx)
}

pub async fn fetch_for_user(
    user_id: UserId,
    conn: &mut SqliteConnection,
) -> Result<Vec<CreditTransaction>, SqliteDatabaseError> {
    let txs = sqlx::query_as("SELECT * FROM credit_transactions WHERE user_id = $1 ORDER BY id")
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    Ok(txs)
}

pub async fn fetch_by_external_ref(
    external_ref: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<CreditTransaction>, SqliteDatabaseError> {
    let tx = sqlx::query_as("SELECT * FROM credit_transactions WHERE external_ref = $1")
        .bind(external_ref)
        .fetch_optional(conn)
        .await?;
    Ok(tx)
}

pub async fn fetch_for_order(
    order_ref: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<CreditTransaction>, SqliteDatabaseError> {
    let txs = sqlx::query_as("SELECT * FROM credit_transactions WHERE order_ref = $1 ORDER BY id")
        .bind(order_ref)
        .fetch_all(conn)
        .await?;
    Ok(txs)
}
