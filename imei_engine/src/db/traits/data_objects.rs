use imei_common::Credits;

use crate::db_types::{Job, Order};

#[derive(Debug, Clone)]
pub enum InsertOrderResult {
    /// The order was stored, together with its debit when one was given.
    Inserted(Order),
    /// The debit could not be covered. Nothing was stored.
    InsufficientFunds { balance: Credits, required: Credits },
}

#[derive(Debug, Clone)]
pub enum InsertJobResult {
    Inserted(Job),
    /// A job with the same idempotency key exists, in whatever state it is in.
    AlreadyExists(Job),
}
