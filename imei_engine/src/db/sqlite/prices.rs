use chrono::Utc;
use imei_common::Credits;
use sqlx::SqliteConnection;

use crate::{db::sqlite::SqliteDatabaseError, db_types::PriceOverride};

pub async fn fetch_all(conn: &mut SqliteConnection) -> Result<Vec<PriceOverride>, SqliteDatabaseError> {
    let prices = sqlx::query_as("SELECT * FROM price_overrides ORDER BY price_key").fetch_all(conn).await?;
    Ok(prices)
}

pub async fn upsert(
    key: &str,
    price: Credits,
    conn: &mut SqliteConnection,
) -> Result<PriceOverride, SqliteDatabaseError> {
    let price = sqlx::query_as(
        r#"
        INSERT INTO price_overrides (price_key, price, updated_at) VALUES ($1, $2, $3)
        ON CONFLICT (price_key) DO UPDATE SET price = excluded.price, updated_at = excluded.updated_at
        RETURNING *;
        "#,
    )
    .bind(key)
    .bind(price)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    Ok(price)
}

pub async fn delete(key: &str, conn: &mut SqliteConnection) -> Result<bool, SqliteDatabaseError> {
    let result = sqlx::query("DELETE FROM price_overrides WHERE price_key = $1").bind(key).execute(conn).await?;
    Ok(result.rows_affected() > 0)
}
