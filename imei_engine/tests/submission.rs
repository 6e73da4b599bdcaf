use imei_common::Credits;
use imei_engine::{
    brands::Brand,
    db_types::{JobPayload, JobStatus, OrderStatusType, PaymentStatus, TransactionType, UserAccount},
    pricing::DefaultPricing,
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        UnavailableQueue,
    },
    traits::OrderManagement,
    EnqueueResult,
    GuestRequest,
    JobQueue,
    JobQueueConfig,
    JobQueueError,
    JobSink,
    LedgerApi,
    OrderSubmissionApi,
    SqliteDatabase,
    SubmissionError,
    VerificationRequest,
};

const IMEI: &str = "490154203237518";

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

async fn funded_account(db: &SqliteDatabase, email: &str, credits: Credits) -> UserAccount {
    let ledger = LedgerApi::new(db.clone());
    let account = ledger.account_for_email(email).await.unwrap();
    if credits.is_positive() {
        ledger.credit(account.id, credits, "top-up", None, TransactionType::Purchase).await.unwrap();
    }
    account
}

fn submission_api(db: &SqliteDatabase) -> OrderSubmissionApi<SqliteDatabase, DefaultPricing, JobQueue<SqliteDatabase>> {
    let queue = JobQueue::new(db.clone(), JobQueueConfig::default());
    OrderSubmissionApi::new(db.clone(), DefaultPricing, queue)
}

#[tokio::test]
async fn submission_charges_and_queues() {
    let db = new_db().await;
    let alice = funded_account(&db, "alice@example.com", Credits::from_whole(10)).await;
    let api = submission_api(&db);
    let request = VerificationRequest::new(alice.id, IMEI).with_brand(Brand::Apple).with_addons(vec![13, 13]);
    let order = api.submit(request).await.unwrap();

    // Apple base price plus one MDM check, charged once even though it was requested twice
    assert_eq!(order.price_charged, Credits::from_whole(4));
    assert_eq!(order.price, order.price_charged);
    assert_eq!(order.status, OrderStatusType::Pending);
    assert_eq!(order.email, "alice@example.com");
    assert_eq!(order.brand, Some(Brand::Apple));

    let ledger = LedgerApi::new(db.clone());
    assert_eq!(ledger.balance(alice.id).await.unwrap(), Credits::from_whole(6));
    let debit = ledger.history(alice.id).await.unwrap().pop().unwrap();
    assert_eq!(debit.tx_type, TransactionType::Usage);
    assert_eq!(debit.order_ref, Some(order.id));

    let queue = JobQueue::new(db.clone(), JobQueueConfig::default());
    let job = queue.job_for_order(order.id).await.unwrap().expect("job was not queued");
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.payload.imei.as_str(), IMEI);
    assert_eq!(job.payload.additional_service_ids, vec![13, 13]);
    db.close().await;
}

#[tokio::test]
async fn insufficient_funds_leave_no_trace() {
    let db = new_db().await;
    let bob = funded_account(&db, "bob@example.com", Credits::from_whole(2)).await;
    let api = submission_api(&db);
    let err = api.submit(VerificationRequest::new(bob.id, IMEI).with_brand(Brand::Apple)).await.unwrap_err();
    assert!(matches!(err, SubmissionError::InsufficientFunds { required, .. } if required == Credits::from_whole(3)));

    assert!(db.fetch_orders_for_user(bob.id).await.unwrap().is_empty());
    let ledger = LedgerApi::new(db.clone());
    assert_eq!(ledger.balance(bob.id).await.unwrap(), Credits::from_whole(2));
    assert_eq!(ledger.history(bob.id).await.unwrap().len(), 1);
    let stats = JobQueue::new(db.clone(), JobQueueConfig::default()).stats().await.unwrap();
    assert_eq!(stats.queued, 0);
    db.close().await;
}

#[tokio::test]
async fn a_failed_enqueue_rolls_the_order_back() {
    let db = new_db().await;
    let carol = funded_account(&db, "carol@example.com", Credits::from_whole(5)).await;
    let queue = UnavailableQueue::new();
    let api = OrderSubmissionApi::new(db.clone(), DefaultPricing, queue);
    let err = api.submit(VerificationRequest::new(carol.id, IMEI).with_brand(Brand::Samsung)).await.unwrap_err();
    assert!(matches!(err, SubmissionError::EnqueueFailed(_)));

    assert!(db.fetch_orders_for_user(carol.id).await.unwrap().is_empty());
    let ledger = LedgerApi::new(db.clone());
    assert_eq!(ledger.balance(carol.id).await.unwrap(), Credits::from_whole(5));
    let history = ledger.history(carol.id).await.unwrap();
    // top-up, debit and the compensating refund
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].tx_type, TransactionType::Refund);
    assert_eq!(history[2].amount, Credits::from_whole(2));
    assert!(ledger.audit(carol.id).await.unwrap().is_consistent());
    db.close().await;
}

/// A queue that goes down together with the database: the enqueue fails after the pool has been closed.
struct ClosingQueue(SqliteDatabase);

impl JobSink for ClosingQueue {
    async fn enqueue(&self, _payload: JobPayload) -> Result<EnqueueResult, JobQueueError> {
        self.0.close().await;
        Err(JobQueueError::Unavailable("database is shutting down".into()))
    }
}

#[tokio::test]
async fn a_failed_rollback_reports_the_order_for_a_retry() {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let erin = funded_account(&db, "erin@example.com", Credits::from_whole(5)).await;
    let api = OrderSubmissionApi::new(db.clone(), DefaultPricing, ClosingQueue(db.clone()));
    let err = api.submit(VerificationRequest::new(erin.id, IMEI).with_brand(Brand::Apple)).await.unwrap_err();
    let order_ref = match err {
        SubmissionError::RollbackFailed { order_ref, .. } => order_ref,
        other => panic!("expected a failed rollback, got {other:?}"),
    };

    // The order and its debit survived the failed rollback
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error reopening database");
    assert!(db.fetch_order(order_ref).await.unwrap().is_some());
    let ledger = LedgerApi::new(db.clone());
    assert_eq!(ledger.balance(erin.id).await.unwrap(), Credits::from_whole(2));

    let api = submission_api(&db);
    assert!(api.retry_rollback(order_ref).await.unwrap());
    assert!(db.fetch_order(order_ref).await.unwrap().is_none());
    assert_eq!(ledger.balance(erin.id).await.unwrap(), Credits::from_whole(5));
    let entries = ledger.order_history(order_ref).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].tx_type, TransactionType::Refund);
    assert_eq!(entries[1].amount, Credits::from_whole(3));
    // a second retry finds nothing left to undo
    assert!(!api.retry_rollback(order_ref).await.unwrap());
    assert_eq!(ledger.balance(erin.id).await.unwrap(), Credits::from_whole(5));
    assert!(ledger.audit(erin.id).await.unwrap().is_consistent());
    db.close().await;
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_charging() {
    let db = new_db().await;
    let dave = funded_account(&db, "dave@example.com", Credits::from_whole(5)).await;
    let api = submission_api(&db);

    let err = api.submit(VerificationRequest::new(dave.id, "490154203237519")).await.unwrap_err();
    assert!(matches!(err, SubmissionError::InvalidImei(_)));
    let err = api.submit(VerificationRequest::new(dave.id, "12345")).await.unwrap_err();
    assert!(matches!(err, SubmissionError::InvalidImei(_)));
    // the Knox add-on is only offered for Samsung
    let err = api.submit(VerificationRequest::new(dave.id, IMEI).with_brand(Brand::Apple).with_addons(vec![36])).await;
    assert!(matches!(err, Err(SubmissionError::PricingError(_))));
    let err = api.submit(VerificationRequest::new(imei_engine::db_types::UserId(404), IMEI)).await.unwrap_err();
    assert!(matches!(err, SubmissionError::AccountNotFound(_)));

    let ledger = LedgerApi::new(db.clone());
    assert_eq!(ledger.balance(dave.id).await.unwrap(), Credits::from_whole(5));
    db.close().await;
}

#[tokio::test]
async fn guest_orders_wait_for_payment() {
    let db = new_db().await;
    let api = submission_api(&db);
    let request = GuestRequest::new("guest@example.com", IMEI, "Samsung Galaxy", "cs_test_1").with_addons(vec![14]);
    let order = api.submit_guest(request).await.unwrap();
    assert!(order.is_guest());
    assert_eq!(order.brand, Some(Brand::Samsung));
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.price, Credits::new(250));
    assert_eq!(order.guest_amount, Some(1250));
    assert_eq!(order.guest_currency.as_deref(), Some("RON"));
    assert_eq!(order.payment_session_id.as_deref(), Some("cs_test_1"));

    let queue = JobQueue::new(db.clone(), JobQueueConfig::default());
    assert!(queue.job_for_order(order.id).await.unwrap().is_none());

    let err = api.submit_guest(GuestRequest::new("guest@example.com", IMEI, "Nokia", "cs_test_2")).await.unwrap_err();
    assert!(matches!(err, SubmissionError::UnknownBrand(b) if b == "Nokia"));
    // one order per payment session
    let err = api.submit_guest(GuestRequest::new("guest@example.com", IMEI, "apple", "cs_test_1")).await.unwrap_err();
    assert!(matches!(err, SubmissionError::DatabaseError(_)));
    db.close().await;
}
