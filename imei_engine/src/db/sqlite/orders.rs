use chrono::Utc;
use imei_common::Credits;
use log::{debug, trace, warn};
use rand::Rng;
use sqlx::{types::Json, SqliteConnection};

use crate::{
    db::sqlite::SqliteDatabaseError,
    db_types::{NewOrder, Order, OrderCompletion, OrderId, OrderStatusType, PaymentStatus, UserId},
};

const MAX_ORDER_ID_ATTEMPTS: usize = 10;

fn random_order_id() -> OrderId {
    OrderId(rand::thread_rng().gen_range(10_000_000..100_000_000))
}

/// Inserts a new order into the database using the given connection. This is not atomic. You can embed this call
/// inside a transaction if you need to ensure atomicity, and pass `&mut *tx` as the connection argument.
///
/// The external order number is random. On the rare collision, a new number is drawn.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, SqliteDatabaseError> {
    let now = Utc::now();
    for attempt in 1..=MAX_ORDER_ID_ATTEMPTS {
        let order_id = random_order_id();
        let result = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (
                order_id, imei, user_id, email, brand, addon_ids, price_charged, price,
                guest_amount, guest_currency, payment_session_id, language, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8, $9, $10, $11, $12, $12)
            RETURNING *;
            "#,
        )
        .bind(order_id)
        .bind(&order.imei)
        .bind(order.user_id)
        .bind(&order.email)
        .bind(order.brand)
        .bind(Json(&order.addon_ids))
        .bind(order.price)
        .bind(order.guest_amount)
        .bind(&order.guest_currency)
        .bind(&order.payment_session_id)
        .bind(&order.language)
        .bind(now)
        .fetch_one(&mut *conn)
        .await;
        match result {
            Ok(order) => {
                trace!("🗃️ Order {} stored with id {}", order.order_id, order.id);
                return Ok(order);
            },
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() && e.message().contains("orders.order_id") => {
                warn!("🗃️ Order number {order_id} is taken (attempt {attempt}). Drawing another.");
            },
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let session = order.payment_session_id.clone().unwrap_or_default();
                return Err(SqliteDatabaseError::DuplicatePaymentSession(session));
            },
            Err(e) => return Err(e.into()),
        }
    }
    Err(SqliteDatabaseError::OrderIdExhausted(MAX_ORDER_ID_ATTEMPTS))
}

pub async fn fetch_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, SqliteDatabaseError> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SqliteDatabaseError> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_session(
    session_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SqliteDatabaseError> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE payment_session_id = $1")
        .bind(session_id)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_orders_for_user(
    user_id: UserId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SqliteDatabaseError> {
    let orders =
        sqlx::query_as("SELECT * FROM orders WHERE user_id = $1 ORDER BY id").bind(user_id).fetch_all(conn).await?;
    Ok(orders)
}

/// Deletes the order. Returns false if it did not exist.
pub async fn delete_order(id: i64, conn: &mut SqliteConnection) -> Result<bool, SqliteDatabaseError> {
    let result = sqlx::query("DELETE FROM orders WHERE id = $1").bind(id).execute(conn).await?;
    debug!("🗃️ Order {id} deleted ({} rows)", result.rows_affected());
    Ok(result.rows_affected() > 0)
}

/// Conditionally moves the payment status. Only pending orders with payment status `from` are changed.
pub async fn update_payment_status(
    id: i64,
    from: PaymentStatus,
    to: PaymentStatus,
    failure_reason: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SqliteDatabaseError> {
    let status = failure_reason.map(|_| OrderStatusType::Failed);
    let order = sqlx::query_as(
        r#"
        UPDATE orders SET
            payment_status = $1,
            status = COALESCE($2, status),
            failure_reason = COALESCE($3, failure_reason),
            updated_at = $4
        WHERE id = $5 AND payment_status = $6 AND status = 'pending'
        RETURNING *;
        "#,
    )
    .bind(to)
    .bind(status)
    .bind(failure_reason)
    .bind(Utc::now())
    .bind(id)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

/// Writes the completion to a pending order and makes it terminal. Returns `None` if the order is not pending (or does
/// not exist). `price` is written separately from the completion so that the caller can hold it back until an
/// accompanying adjustment has been applied.
pub async fn finalize_order(
    id: i64,
    completion: &OrderCompletion,
    price: Option<Credits>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, SqliteDatabaseError> {
    let order = sqlx::query_as(
        r#"
        UPDATE orders SET
            status = $1,
            brand = COALESCE($2, brand),
            model_name = COALESCE($3, model_name),
            price = COALESCE($4, price),
            guest_amount = COALESCE($5, guest_amount),
            failure_reason = $6,
            raw_result = $7,
            report = $8,
            risk = $9,
            updated_at = $10
        WHERE id = $11 AND status = 'pending'
        RETURNING *;
        "#,
    )
    .bind(completion.status)
    .bind(completion.brand)
    .bind(&completion.model_name)
    .bind(price)
    .bind(completion.guest_amount)
    .bind(&completion.failure_reason)
    .bind(&completion.raw_result)
    .bind(completion.report.as_ref().map(Json))
    .bind(completion.risk.as_ref().map(Json))
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub async fn update_price(id: i64, price: Credits, conn: &mut SqliteConnection) -> Result<Order, SqliteDatabaseError> {
    let order = sqlx::query_as("UPDATE orders SET price = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(price)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(conn)
        .await?;
    order.ok_or(SqliteDatabaseError::OrderNotFound(id))
}
