use std::{collections::HashMap, time::Duration};

use cucumber::World;
use imei_engine::{
    db_types::{Order, UserAccount},
    events::EventProducers,
    gateway::Gateway,
    pricing::DefaultPricing,
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        FakeProvider,
    },
    throttle::ThrottleManager,
    BackoffPolicy,
    JobQueue,
    JobQueueConfig,
    LedgerApi,
    OrderProcessor,
    OrderSubmissionApi,
    PaymentReconciler,
    SqliteDatabase,
};
use log::*;

#[derive(Default, Debug, World)]
pub struct VerificationWorld {
    pub system: Option<VerificationSystem>,
}

#[derive(Debug)]
pub struct VerificationSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub provider: FakeProvider,
    pub queue: JobQueue<SqliteDatabase>,
    pub processor: OrderProcessor<SqliteDatabase, FakeProvider, DefaultPricing>,
    pub submission: OrderSubmissionApi<SqliteDatabase, DefaultPricing, JobQueue<SqliteDatabase>>,
    pub reconciler: PaymentReconciler<SqliteDatabase, JobQueue<SqliteDatabase>>,
    pub ledger: LedgerApi<SqliteDatabase>,
    pub accounts: HashMap<String, UserAccount>,
    pub last_order: Option<Order>,
    pub last_error: Option<String>,
}

impl VerificationWorld {
    pub fn system(&self) -> &VerificationSystem {
        self.system.as_ref().expect("System not initialised. Start the scenario with 'Given a fresh install'")
    }

    pub fn system_mut(&mut self) -> &mut VerificationSystem {
        self.system.as_mut().expect("System not initialised. Start the scenario with 'Given a fresh install'")
    }
}

impl VerificationSystem {
    pub async fn new() -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
        debug!("Created database: {url}");
        let provider = FakeProvider::new();
        let gateway = Gateway::new(provider.clone(), ThrottleManager::default());
        let config = JobQueueConfig {
            max_attempts: 2,
            backoff: BackoffPolicy::new(Duration::ZERO, Duration::ZERO),
            ..Default::default()
        };
        let queue = JobQueue::new(db.clone(), config);
        let processor = OrderProcessor::new(db.clone(), gateway, DefaultPricing, EventProducers::default());
        let submission = OrderSubmissionApi::new(db.clone(), DefaultPricing, queue.clone());
        let reconciler = PaymentReconciler::new(db.clone(), queue.clone(), EventProducers::default());
        let ledger = LedgerApi::new(db.clone());
        Self {
            db_path: url,
            db,
            provider,
            queue,
            processor,
            submission,
            reconciler,
            ledger,
            accounts: HashMap::new(),
            last_order: None,
            last_error: None,
        }
    }

    pub fn account(&self, email: &str) -> &UserAccount {
        self.accounts.get(email).unwrap_or_else(|| panic!("No user called {email} was set up"))
    }

    pub fn last_order(&self) -> &Order {
        self.last_order.as_ref().expect("No order was submitted")
    }
}
