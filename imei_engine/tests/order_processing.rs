use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};

use imei_common::Credits;
use imei_engine::{
    brands::{AddonService, Brand},
    db_types::{JobPayload, JobStatus, Order, OrderStatusType, PaymentStatus, TransactionType, UserAccount},
    engine_api::{order_processor::PAYMENT_INCOMPLETE, payment_reconciler::PAYMENT_FAILED},
    events::{EventHandlers, EventHooks, EventProducers, OrderCompletedEvent, OrderFailedEvent},
    gateway::Gateway,
    pricing::{DefaultPricing, PricingError, PricingSource},
    reports::DeviceReport,
    risk::RiskTier,
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        FakeProvider,
    },
    throttle::ThrottleManager,
    traits::OrderManagement,
    BackoffPolicy,
    GuestPaymentResult,
    GuestRequest,
    JobOutcome,
    JobQueue,
    JobQueueConfig,
    LedgerApi,
    OrderProcessor,
    OrderSubmissionApi,
    PaymentReconciler,
    ProcessOutcome,
    SqliteDatabase,
    VerificationRequest,
};
use serde_json::json;

const IMEI: &str = "356938035643809";

type Processor = OrderProcessor<SqliteDatabase, FakeProvider, DefaultPricing>;

struct System {
    db: SqliteDatabase,
    provider: FakeProvider,
    queue: JobQueue<SqliteDatabase>,
    processor: Processor,
    submission: OrderSubmissionApi<SqliteDatabase, DefaultPricing, JobQueue<SqliteDatabase>>,
    reconciler: PaymentReconciler<SqliteDatabase, JobQueue<SqliteDatabase>>,
    ledger: LedgerApi<SqliteDatabase>,
}

impl System {
    async fn new() -> Self {
        Self::with_producers(EventProducers::default()).await
    }

    async fn with_producers(producers: EventProducers) -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let provider = FakeProvider::new();
        let gateway = Gateway::new(provider.clone(), ThrottleManager::default());
        let backoff = BackoffPolicy::new(Duration::ZERO, Duration::ZERO);
        let config = JobQueueConfig { backoff, ..Default::default() };
        let queue = JobQueue::new(db.clone(), config);
        let processor = OrderProcessor::new(db.clone(), gateway, DefaultPricing, producers.clone());
        let submission = OrderSubmissionApi::new(db.clone(), DefaultPricing, queue.clone());
        let reconciler = PaymentReconciler::new(db.clone(), queue.clone(), producers);
        let ledger = LedgerApi::new(db.clone());
        Self { db, provider, queue, processor, submission, reconciler, ledger }
    }

    async fn funded_account(&self, email: &str, whole_credits: i64) -> UserAccount {
        let account = self.ledger.account_for_email(email).await.unwrap();
        self.ledger
            .credit(account.id, Credits::from_whole(whole_credits), "top-up", None, TransactionType::Purchase)
            .await
            .unwrap();
        account
    }

    async fn order(&self, id: i64) -> Order {
        self.db.fetch_order(id).await.unwrap().expect("order is missing")
    }

    fn script_clean_iphone(&self) {
        self.provider
            .classify_as("Apple")
            .succeed(4, json!({"model": "iPhone 13", "fmiOn": false, "lostMode": false, "simLock": "Unlocked"}))
            .succeed(6, json!({"blacklistStatus": "Clean"}));
    }
}

/// A price store that cannot be read, so every processing attempt ends in an error.
struct UnreadablePrices;

impl PricingSource for UnreadablePrices {
    async fn base_price(&self, _brand: Option<Brand>) -> Result<Credits, PricingError> {
        Err(PricingError::StoreError("price table is locked".into()))
    }

    async fn additional_services(&self, _brand: Option<Brand>) -> Result<Vec<AddonService>, PricingError> {
        Err(PricingError::StoreError("price table is locked".into()))
    }
}

#[tokio::test]
async fn happy_path_completes_the_order() {
    let sys = System::new().await;
    sys.script_clean_iphone();
    let alice = sys.funded_account("alice@example.com", 10).await;
    let order =
        sys.submission.submit(VerificationRequest::new(alice.id, IMEI).with_brand(Brand::Apple)).await.unwrap();

    let outcomes = sys.queue.drain(&sys.processor).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], JobOutcome::Completed { .. }));

    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Success);
    assert_eq!(order.model_name.as_deref(), Some("iPhone 13"));
    assert_eq!(order.price, Credits::from_whole(3));
    assert!(order.raw_result.is_some());
    let Some(DeviceReport::Apple(facts)) = &order.report else { panic!("expected an Apple report: {:?}", order.report) };
    assert_eq!(facts.find_my, Some(false));
    assert_eq!(facts.blacklisted, Some(false));
    let risk = order.risk.expect("risk was not assessed");
    assert_eq!(risk.tier, RiskTier::Safe);
    assert_eq!(risk.score, 100);

    assert_eq!(sys.ledger.balance(alice.id).await.unwrap(), Credits::from_whole(7));
    let job = sys.queue.job_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    sys.db.close().await;
}

#[tokio::test]
async fn the_detected_brand_trues_up_the_price() {
    let sys = System::new().await;
    sys.script_clean_iphone();
    let bob = sys.funded_account("bob@example.com", 10).await;
    // declared as Samsung (2.00) but the device is an iPhone (3.00)
    let order = sys
        .submission
        .submit(VerificationRequest::new(bob.id, IMEI).with_brand(Brand::Samsung).with_addons(vec![14]))
        .await
        .unwrap();
    assert_eq!(order.price_charged, Credits::new(250));
    sys.queue.drain(&sys.processor).await.unwrap();

    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Success);
    assert_eq!(order.brand, Some(Brand::Apple));
    assert_eq!(order.price, Credits::new(350));
    assert_eq!(order.price_charged, Credits::new(250));
    assert_eq!(sys.ledger.balance(bob.id).await.unwrap(), Credits::new(650));
    let adjustment = sys.ledger.history(bob.id).await.unwrap().pop().unwrap();
    assert_eq!(adjustment.tx_type, TransactionType::Adjustment);
    assert_eq!(adjustment.amount, Credits::new(-100));
    assert!(sys.ledger.audit(bob.id).await.unwrap().is_consistent());
    sys.db.close().await;
}

#[tokio::test]
async fn a_cheaper_brand_is_credited_back() {
    let sys = System::new().await;
    sys.provider.classify_as("Xiaomi").succeed(21, json!({"model": "Redmi Note 12", "miAccountLock": "OFF"}));
    let carol = sys.funded_account("carol@example.com", 5).await;
    // an add-on that Xiaomi devices do not offer is dropped from the new price
    let order = sys
        .submission
        .submit(VerificationRequest::new(carol.id, IMEI).with_brand(Brand::Apple).with_addons(vec![13]))
        .await
        .unwrap();
    assert_eq!(order.price_charged, Credits::from_whole(4));
    sys.queue.drain(&sys.processor).await.unwrap();

    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Success);
    assert_eq!(order.price, Credits::new(150));
    assert_eq!(sys.ledger.balance(carol.id).await.unwrap(), Credits::new(350));
    let Some(DeviceReport::Android { brand, facts }) = &order.report else { panic!("expected an Android report") };
    assert_eq!(*brand, Brand::Xiaomi);
    assert_eq!(facts.registration_guard, Some(false));
    sys.db.close().await;
}

#[tokio::test]
async fn exhausted_lookups_fail_and_refund_once() {
    let sys = System::new().await;
    // nothing is scripted, so every service fails
    let dave = sys.funded_account("dave@example.com", 10).await;
    let order =
        sys.submission.submit(VerificationRequest::new(dave.id, IMEI).with_brand(Brand::Samsung)).await.unwrap();
    assert_eq!(sys.ledger.balance(dave.id).await.unwrap(), Credits::from_whole(8));

    let outcomes = sys.queue.drain(&sys.processor).await.unwrap();
    // a typed lookup failure is a final answer, not a retry
    assert_eq!(outcomes.len(), 1);
    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Failed);
    assert!(order.failure_reason.as_deref().unwrap_or_default().contains("svc#8"));
    assert_eq!(sys.ledger.balance(dave.id).await.unwrap(), Credits::from_whole(10));

    // a redelivered job and a late error path change nothing
    let payload = JobPayload::from(&order);
    let again = sys.processor.process(&payload).await.unwrap();
    assert_eq!(again, ProcessOutcome::AlreadyFinal(OrderStatusType::Failed));
    let late = sys.processor.fail_with_error(order.id, "late").await.unwrap();
    assert_eq!(late, ProcessOutcome::AlreadyFinal(OrderStatusType::Failed));

    assert_eq!(sys.ledger.balance(dave.id).await.unwrap(), Credits::from_whole(10));
    let refunds = sys
        .ledger
        .history(dave.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.tx_type == TransactionType::Refund)
        .count();
    assert_eq!(refunds, 1);
    sys.db.close().await;
}

#[tokio::test]
async fn the_classifier_answer_is_a_usable_result() {
    let sys = System::new().await;
    sys.provider.succeed_with_text(11, "Brand: Huawei<br>Model: P30 Pro");
    let erin = sys.funded_account("erin@example.com", 5).await;
    let order = sys.submission.submit(VerificationRequest::new(erin.id, IMEI)).await.unwrap();
    sys.queue.drain(&sys.processor).await.unwrap();

    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Success);
    assert_eq!(order.brand, Some(Brand::Huawei));
    assert_eq!(order.model_name.as_deref(), Some("P30 Pro"));
    // generic price 1.00 trued up to Huawei's 1.50
    assert_eq!(sys.ledger.balance(erin.id).await.unwrap(), Credits::new(350));
    sys.db.close().await;
}

#[tokio::test]
async fn blacklisted_devices_are_dangerous() {
    let sys = System::new().await;
    sys.provider
        .classify_as("Samsung")
        .succeed(8, json!({"model": "Galaxy S21", "knoxRegistration": "ON"}))
        .succeed(6, json!({"blacklistStatus": "Blacklisted"}));
    let frank = sys.funded_account("frank@example.com", 5).await;
    let order =
        sys.submission.submit(VerificationRequest::new(frank.id, IMEI).with_brand(Brand::Samsung)).await.unwrap();
    sys.queue.drain(&sys.processor).await.unwrap();

    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Success);
    let risk = order.risk.unwrap();
    assert_eq!(risk.tier, RiskTier::Danger);
    assert!(risk.active_signals.contains(&"blacklisted".to_string()));
    assert!(risk.active_signals.contains(&"registration_guard".to_string()));
    sys.db.close().await;
}

#[tokio::test]
async fn guest_orders_run_only_after_payment() {
    let sys = System::new().await;
    sys.script_clean_iphone();
    let order = sys.submission.submit_guest(GuestRequest::new("guest@example.com", IMEI, "iPhone", "cs_1")).await.unwrap();
    assert!(sys.queue.drain(&sys.processor).await.unwrap().is_empty());

    let result = sys.reconciler.confirm_guest_payment("cs_1").await.unwrap();
    let GuestPaymentResult::Confirmed { order: paid, newly_paid, .. } = result else { panic!("payment was ignored") };
    assert!(newly_paid);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);

    // duplicate webhook deliveries neither re-mark nor re-queue
    let result = sys.reconciler.confirm_guest_payment("cs_1").await.unwrap();
    assert!(matches!(result, GuestPaymentResult::Confirmed { newly_paid: false, .. }));
    assert_eq!(sys.queue.stats().await.unwrap().queued, 1);

    sys.queue.drain(&sys.processor).await.unwrap();
    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Success);
    assert_eq!(order.guest_amount, Some(1500));

    // confirmations after completion are harmless
    let result = sys.reconciler.confirm_guest_payment("cs_1").await.unwrap();
    assert!(matches!(result, GuestPaymentResult::Confirmed { newly_paid: false, .. }));
    assert!(sys.queue.drain(&sys.processor).await.unwrap().is_empty());
    assert_eq!(sys.provider.call_count(4), 1);
    sys.db.close().await;
}

#[tokio::test]
async fn guest_true_up_changes_the_displayed_amount() {
    let sys = System::new().await;
    sys.provider.classify_as("Samsung").succeed(8, json!({"model": "Galaxy A52"}));
    let order = sys.submission.submit_guest(GuestRequest::new("guest@example.com", IMEI, "apple", "cs_2")).await.unwrap();
    assert_eq!(order.guest_amount, Some(1500));
    sys.reconciler.confirm_guest_payment("cs_2").await.unwrap();
    sys.queue.drain(&sys.processor).await.unwrap();
    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Success);
    assert_eq!(order.brand, Some(Brand::Samsung));
    assert_eq!(order.guest_amount, Some(1000));
    sys.db.close().await;
}

#[tokio::test]
async fn unpaid_guest_orders_are_never_verified() {
    let sys = System::new().await;
    sys.script_clean_iphone();
    let order = sys.submission.submit_guest(GuestRequest::new("guest@example.com", IMEI, "apple", "cs_3")).await.unwrap();
    // a job for an unpaid order reaches the processor anyway
    sys.queue.enqueue(JobPayload::from(&order)).await.unwrap();
    sys.queue.drain(&sys.processor).await.unwrap();

    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Failed);
    assert_eq!(order.failure_reason.as_deref(), Some(PAYMENT_INCOMPLETE));
    assert!(sys.provider.calls().is_empty());
    sys.db.close().await;
}

#[tokio::test]
async fn failed_guest_payments_end_the_order() {
    let sys = System::new().await;
    let order = sys.submission.submit_guest(GuestRequest::new("guest@example.com", IMEI, "apple", "cs_4")).await.unwrap();
    let failed = sys.reconciler.fail_guest_payment("cs_4").await.unwrap().expect("payment was pending");
    assert_eq!(failed.status, OrderStatusType::Failed);
    assert_eq!(failed.payment_status, PaymentStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some(PAYMENT_FAILED));
    assert!(sys.reconciler.fail_guest_payment("cs_4").await.unwrap().is_none());

    let result = sys.reconciler.confirm_guest_payment("cs_4").await.unwrap();
    assert!(matches!(result, GuestPaymentResult::Ignored(_)));
    assert!(sys.queue.job_for_order(order.id).await.unwrap().is_none());
    assert!(sys.reconciler.confirm_guest_payment("cs_unknown").await.is_err());
    sys.db.close().await;
}

#[tokio::test]
async fn hooks_are_notified_once_per_order() {
    let completed = Arc::new(Mutex::new(Vec::<String>::new()));
    let failed = Arc::new(Mutex::new(Vec::<(String, bool)>::new()));
    let mut hooks = EventHooks::default();
    let c2 = Arc::clone(&completed);
    hooks.on_order_completed(move |ev: OrderCompletedEvent| {
        let completed = Arc::clone(&c2);
        Box::pin(async move {
            completed.lock().unwrap().push(ev.order.email.clone());
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let f2 = Arc::clone(&failed);
    hooks.on_order_failed(move |ev: OrderFailedEvent| {
        let failed = Arc::clone(&f2);
        Box::pin(async move {
            failed.lock().unwrap().push((ev.order.email.clone(), ev.refunded));
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let handlers = EventHandlers::new(16, hooks);
    let sys = System::with_producers(handlers.producers()).await;
    handlers.start_handlers();

    let good = sys.funded_account("good@example.com", 5).await;
    let bad = sys.funded_account("bad@example.com", 5).await;
    sys.provider.classify_as("Google").succeed(23, json!({"model": "Pixel 7"}));
    sys.submission.submit(VerificationRequest::new(good.id, IMEI).with_brand(Brand::Google)).await.unwrap();
    sys.queue.drain(&sys.processor).await.unwrap();

    sys.provider.fail(11).fail(23).fail(9);
    sys.submission.submit(VerificationRequest::new(bad.id, IMEI).with_brand(Brand::Google)).await.unwrap();
    sys.queue.drain(&sys.processor).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*completed.lock().unwrap(), vec!["good@example.com".to_string()]);
    assert_eq!(*failed.lock().unwrap(), vec![("bad@example.com".to_string(), true)]);
    sys.db.close().await;
}

#[tokio::test]
async fn a_dead_job_ends_the_order_in_error_and_refunds_once() {
    let sys = System::new().await;
    sys.script_clean_iphone();
    let gina = sys.funded_account("gina@example.com", 10).await;
    let order =
        sys.submission.submit(VerificationRequest::new(gina.id, IMEI).with_brand(Brand::Apple)).await.unwrap();
    assert_eq!(sys.ledger.balance(gina.id).await.unwrap(), Credits::from_whole(7));

    let gateway = Gateway::new(sys.provider.clone(), ThrottleManager::default());
    let processor = OrderProcessor::new(sys.db.clone(), gateway, UnreadablePrices, EventProducers::default());
    let outcomes = sys.queue.drain(&processor).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[..2].iter().all(|o| matches!(o, JobOutcome::Retrying { .. })));
    assert!(matches!(&outcomes[2], JobOutcome::Dead { error, .. } if error.contains("price table is locked")));

    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Error);
    assert!(order.failure_reason.as_deref().unwrap_or_default().contains("price table is locked"));
    let refunds = sys
        .ledger
        .order_history(order.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.tx_type == TransactionType::Refund)
        .collect::<Vec<_>>();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, order.price_charged);
    assert_eq!(sys.ledger.balance(gina.id).await.unwrap(), Credits::from_whole(10));

    // the error path runs again for a stale delivery without paying a second refund
    let again = processor.fail_with_error(order.id, "stale delivery").await.unwrap();
    assert_eq!(again, ProcessOutcome::AlreadyFinal(OrderStatusType::Error));
    assert_eq!(sys.ledger.balance(gina.id).await.unwrap(), Credits::from_whole(10));
    let job = sys.queue.job_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Dead);
    assert!(sys.ledger.audit(gina.id).await.unwrap().is_consistent());
    sys.db.close().await;
}

#[tokio::test]
async fn an_adjustment_the_balance_cannot_cover_is_absorbed() {
    let sys = System::new().await;
    sys.script_clean_iphone();
    let hank = sys.funded_account("hank@example.com", 2).await;
    // declared as Samsung (2.00), which spends the whole balance, but the device is an iPhone (3.00)
    let order =
        sys.submission.submit(VerificationRequest::new(hank.id, IMEI).with_brand(Brand::Samsung)).await.unwrap();
    assert_eq!(sys.ledger.balance(hank.id).await.unwrap(), Credits::ZERO);
    sys.queue.drain(&sys.processor).await.unwrap();

    let order = sys.order(order.id).await;
    assert_eq!(order.status, OrderStatusType::Success);
    assert_eq!(order.brand, Some(Brand::Apple));
    assert_eq!(order.price, Credits::from_whole(2));
    assert_eq!(order.price_charged, Credits::from_whole(2));
    assert_eq!(sys.ledger.balance(hank.id).await.unwrap(), Credits::ZERO);
    let entries = sys.ledger.order_history(order.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tx_type, TransactionType::Usage);
    assert!(sys.ledger.audit(hank.id).await.unwrap().is_consistent());
    sys.db.close().await;
}
