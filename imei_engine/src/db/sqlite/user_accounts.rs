use chrono::Utc;
use imei_common::Credits;
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{UserAccount, UserId},
};

pub async fn user_account_by_id(
    user_id: UserId,
    conn: &mut SqliteConnection,
) -> Result<Option<UserAccount>, SqliteDatabaseError> {
    let account = sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(user_id).fetch_optional(conn).await?;
    Ok(account)
}

pub async fn user_account_by_email(
    email: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<UserAccount>, SqliteDatabaseError> {
    let account = sqlx::query_as("SELECT * FROM users WHERE email = $1").bind(email).fetch_optional(conn).await?;
    Ok(account)
}

/// Returns the account for `email`, creating an empty one if necessary. The insert comes first, so that two callers
/// racing to create the same account both end up with the same row.
pub async fn fetch_or_create_account(
    email: &str,
    conn: &mut SqliteConnection,
) -> Result<UserAccount, SqliteDatabaseError> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO users (email, balance, created_at, updated_at) VALUES ($1, 0, $2, $2) ON CONFLICT (email) DO \
         NOTHING",
    )
    .bind(email)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        debug!("🧑️ Created a new account for {email}");
    }
    user_account_by_email(email, conn)
        .await?
        .ok_or_else(|| SqliteDatabaseError::QueryError(format!("Account for {email} vanished after creation")))
}

/// Takes the write lock for the user's row by touching it, then returns the current balance.
///
/// This must be the first statement of a balance mutation. With the write lock held, no other connection can change
/// the balance until the surrounding transaction ends, so the read-modify-write that follows cannot interleave with
/// another one for the same user.
pub async fn lock_user_balance(user_id: UserId, conn: &mut SqliteConnection) -> Result<Credits, SqliteDatabaseError> {
    let balance: Option<Credits> =
        sqlx::query_scalar("UPDATE users SET updated_at = $1 WHERE id = $2 RETURNING balance")
            .bind(Utc::now())
            .bind(user_id)
            .fetch_optional(conn)
            .await?;
    trace!("🧑️ Balance of {user_id} locked at {balance:?}");
    balance.ok_or(SqliteDatabaseError::AccountNotFound(user_id))
}

pub async fn set_balance(
    user_id: UserId,
    balance: Credits,
    conn: &mut SqliteConnection,
) -> Result<(), SqliteDatabaseError> {
    sqlx::query("UPDATE users SET balance = $1, updated_at = $2 WHERE id = $3")
        .bind(balance)
        .bind(Utc::now())
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}
