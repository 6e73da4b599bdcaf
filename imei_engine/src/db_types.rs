use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use imei_common::Credits;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, types::Json, FromRow, Row, Type};
use thiserror::Error;

use crate::{brands::Brand, reports::DeviceReport, risk::RiskAssessment};

//--------------------------------------        Imei          ---------------------------------------------------------
/// A validated device identifier: exactly 15 ASCII digits whose last digit is a valid Luhn check digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct Imei(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImeiError {
    #[error("An IMEI must be exactly 15 digits, but {0} characters were given")]
    InvalidLength(usize),
    #[error("An IMEI may only contain digits")]
    NonDigit,
    #[error("The IMEI check digit is invalid")]
    ChecksumMismatch,
}

impl Imei {
    pub fn parse(value: &str) -> Result<Self, ImeiError> {
        let value = value.trim();
        if !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(ImeiError::NonDigit);
        }
        if value.len() != 15 {
            return Err(ImeiError::InvalidLength(value.len()));
        }
        if !luhn_valid(value) {
            return Err(ImeiError::ChecksumMismatch);
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The Type Allocation Code: the first eight digits, which identify the manufacturer and model.
    pub fn tac(&self) -> &str {
        &self.0[..8]
    }
}

fn luhn_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .map(|b| u32::from(b - b'0'))
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

impl TryFrom<String> for Imei {
    type Error = ImeiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Imei> for String {
    fn from(value: Imei) -> Self {
        value.0
    }
}

impl Display for Imei {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

//--------------------------------------        UserId         ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user#{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

//--------------------------------------        OrderId        ---------------------------------------------------------
/// The externally visible order number. Internally, orders are keyed by their row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderId(pub i64);

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse::<i64>().map(Self)
    }
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatusType {
    /// The order has been created and is waiting for payment or for the verification to run.
    Pending,
    /// The verification ran and produced a usable result.
    Success,
    /// The verification could not be performed: every lookup path failed, or the payment never completed.
    Failed,
    /// An unexpected failure prevented the verification from completing.
    Error,
}

impl OrderStatusType {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Terminal states in which the customer did not receive what they paid for.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::Pending => write!(f, "pending"),
            OrderStatusType::Success => write!(f, "success"),
            OrderStatusType::Failed => write!(f, "failed"),
            OrderStatusType::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid status: {0}")]
pub struct ConversionError(String);

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "error" => Ok(Self::Error),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------    PaymentStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Internal row id. This is the key used by the ledger and the job queue.
    pub id: i64,
    pub order_id: OrderId,
    pub imei: Imei,
    /// `None` for guest orders
    pub user_id: Option<UserId>,
    pub email: String,
    pub brand: Option<Brand>,
    pub model_name: Option<String>,
    pub addon_ids: Vec<u16>,
    /// The price debited when the order was submitted. Refunds always return this amount.
    pub price_charged: Credits,
    /// The authoritative price once the brand is known. Equals `price_charged` until a true-up happens.
    pub price: Credits,
    /// What a guest pays (or was shown), in minor units of `guest_currency`.
    pub guest_amount: Option<i64>,
    pub guest_currency: Option<String>,
    pub payment_session_id: Option<String>,
    pub status: OrderStatusType,
    pub payment_status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub raw_result: Option<String>,
    pub report: Option<DeviceReport>,
    pub risk: Option<RiskAssessment>,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }
}

impl<'r> FromRow<'r, SqliteRow> for Order {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let addon_ids: Json<Vec<u16>> = row.try_get("addon_ids")?;
        let report: Option<Json<DeviceReport>> = row.try_get("report")?;
        let risk: Option<Json<RiskAssessment>> = row.try_get("risk")?;
        Ok(Self {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            imei: row.try_get("imei")?,
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            brand: row.try_get("brand")?,
            model_name: row.try_get("model_name")?,
            addon_ids: addon_ids.0,
            price_charged: row.try_get("price_charged")?,
            price: row.try_get("price")?,
            guest_amount: row.try_get("guest_amount")?,
            guest_currency: row.try_get("guest_currency")?,
            payment_session_id: row.try_get("payment_session_id")?,
            status: row.try_get("status")?,
            payment_status: row.try_get("payment_status")?,
            failure_reason: row.try_get("failure_reason")?,
            raw_result: row.try_get("raw_result")?,
            report: report.map(|r| r.0),
            risk: risk.map(|r| r.0),
            language: row.try_get("language")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

//--------------------------------------        NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub imei: Imei,
    pub user_id: Option<UserId>,
    pub email: String,
    /// The brand declared (or guessed) at submission time. The verification may find a different one.
    pub brand: Option<Brand>,
    pub addon_ids: Vec<u16>,
    pub price: Credits,
    pub guest_amount: Option<i64>,
    pub guest_currency: Option<String>,
    pub payment_session_id: Option<String>,
    pub language: String,
}

impl NewOrder {
    pub fn new(imei: Imei, email: impl Into<String>, price: Credits) -> Self {
        Self {
            imei,
            user_id: None,
            email: email.into(),
            brand: None,
            addon_ids: Vec::new(),
            price,
            guest_amount: None,
            guest_currency: None,
            payment_session_id: None,
            language: "en".to_string(),
        }
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_brand(mut self, brand: Option<Brand>) -> Self {
        self.brand = brand;
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

    pub fn with_guest_payment(mut self, amount: i64, currency: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.guest_amount = Some(amount);
        self.guest_currency = Some(currency.into());
        self.payment_session_id = Some(session_id.into());
        self
    }
}

//--------------------------------------   OrderCompletion     ---------------------------------------------------------
/// Everything the order processor writes when it moves an order into a terminal state. It is persisted in a single
/// atomic unit, together with the optional ledger entry (a price adjustment or a refund).
#[derive(Debug, Clone)]
pub struct OrderCompletion {
    pub status: OrderStatusType,
    pub brand: Option<Brand>,
    pub model_name: Option<String>,
    pub price: Option<Credits>,
    pub guest_amount: Option<i64>,
    pub failure_reason: Option<String>,
    pub raw_result: Option<String>,
    pub report: Option<DeviceReport>,
    pub risk: Option<RiskAssessment>,
    pub ledger_entry: Option<NewCreditTransaction>,
}

impl OrderCompletion {
    pub fn failed(status: OrderStatusType, reason: impl Into<String>) -> Self {
        Self {
            status,
            brand: None,
            model_name: None,
            price: None,
            guest_amount: None,
            failure_reason: Some(reason.into()),
            raw_result: None,
            report: None,
            risk: None,
            ledger_entry: None,
        }
    }

    pub fn with_ledger_entry(mut self, entry: Option<NewCreditTransaction>) -> Self {
        self.ledger_entry = entry;
        self
    }
}

#[derive(Debug, Clone)]
pub enum FinalizeResult {
    /// The order moved to its terminal state. `ledger_applied` is false when the accompanying ledger entry was
    /// skipped (already applied earlier, or an adjustment the balance could not cover).
    Finalized { order: Order, ledger_applied: bool },
    /// The order was already terminal. Nothing was written.
    AlreadyFinal(Order),
}

//--------------------------------------     UserAccount       ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    pub balance: Credits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------   TransactionType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Credits bought with real money
    Purchase,
    /// Credits spent on a verification
    Usage,
    /// Credits returned for a verification that did not complete
    Refund,
    /// A signed correction, e.g. a price true-up once the real brand is known
    Adjustment,
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Purchase => write!(f, "purchase"),
            TransactionType::Usage => write!(f, "usage"),
            TransactionType::Refund => write!(f, "refund"),
            TransactionType::Adjustment => write!(f, "adjustment"),
        }
    }
}

impl From<String> for TransactionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "purchase" => Self::Purchase,
            "usage" => Self::Usage,
            "refund" => Self::Refund,
            "adjustment" => Self::Adjustment,
            _ => {
                error!("Invalid transaction type: {value}. But this conversion cannot fail. Defaulting to adjustment");
                Self::Adjustment
            },
        }
    }
}

//--------------------------------------  CreditTransaction    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CreditTransaction {
    pub id: i64,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    /// Signed: negative amounts are debits
    pub amount: Credits,
    pub balance_after: Option<Credits>,
    pub description: String,
    /// Internal id of the order this entry relates to, if any
    pub order_ref: Option<i64>,
    /// The payment provider's payment-intent id, for purchases
    pub external_ref: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCreditTransaction {
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub amount: Credits,
    pub description: String,
    pub order_ref: Option<i64>,
    pub external_ref: Option<String>,
    pub idempotency_key: Option<String>,
}

impl NewCreditTransaction {
    pub fn new(user_id: UserId, tx_type: TransactionType, amount: Credits, description: impl Into<String>) -> Self {
        Self {
            user_id,
            tx_type,
            amount,
            description: description.into(),
            order_ref: None,
            external_ref: None,
            idempotency_key: None,
        }
    }

    pub fn for_order(mut self, order_ref: i64) -> Self {
        self.order_ref = Some(order_ref);
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// The outcome of appending an entry to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerUpdate {
    /// The entry was appended and the balance changed by its amount.
    Applied(CreditTransaction),
    /// An entry with the same idempotency key or external reference already exists. Nothing changed.
    Duplicate(CreditTransaction),
    /// Applying the entry would have made the balance negative. Nothing changed.
    InsufficientFunds { balance: Credits, required: Credits },
}

//--------------------------------------      JobStatus        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    /// Every attempt failed. The job will not run again.
    Dead,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Dead => write!(f, "dead"),
        }
    }
}

//--------------------------------------      JobPayload       ---------------------------------------------------------
/// The unit of work handed to the order processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Internal order row id
    pub order_ref: i64,
    pub order_id: OrderId,
    pub imei: Imei,
    pub user_id: Option<UserId>,
    pub email: String,
    pub detected_brand: Option<Brand>,
    pub additional_service_ids: Vec<u16>,
    pub language: String,
}

impl JobPayload {
    /// The idempotency key for the job that processes the given order. A second enqueue with the same key is a no-op.
    pub fn idempotency_key_for(order_ref: i64) -> String {
        format!("order-{order_ref}")
    }

    pub fn idempotency_key(&self) -> String {
        Self::idempotency_key_for(self.order_ref)
    }
}

impl From<&Order> for JobPayload {
    fn from(order: &Order) -> Self {
        Self {
            order_ref: order.id,
            order_id: order.order_id,
            imei: order.imei.clone(),
            user_id: order.user_id,
            email: order.email.clone(),
            detected_brand: order.brand,
            additional_service_ids: order.addon_ids.clone(),
            language: order.language.clone(),
        }
    }
}

//--------------------------------------         Job           ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub idempotency_key: String,
    pub order_ref: i64,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// Number of attempts started so far, including the current one for a running job.
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_last_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl<'r> FromRow<'r, SqliteRow> for Job {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let payload: Json<JobPayload> = row.try_get("payload")?;
        Ok(Self {
            id: row.try_get("id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            order_ref: row.try_get("order_ref")?,
            payload: payload.0,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            run_at: row.try_get("run_at")?,
            locked_at: row.try_get("locked_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub dead: i64,
}

//--------------------------------------    PriceOverride      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PriceOverride {
    pub price_key: String,
    pub price: Credits,
    pub updated_at: DateTime<Utc>,
}
