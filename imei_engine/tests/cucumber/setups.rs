use cucumber::given;
use imei_common::Credits;
use imei_engine::db_types::TransactionType;
use serde_json::Value;

use crate::cucumber::{world::VerificationSystem, VerificationWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut VerificationWorld) {
    let system = VerificationSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "a user {string} with {int} credits")]
async fn user_with_credits(world: &mut VerificationWorld, email: String, credits: i64) {
    let system = world.system_mut();
    let account = system.ledger.account_for_email(&email).await.expect("Error creating account");
    if credits > 0 {
        system
            .ledger
            .credit(account.id, Credits::from_whole(credits), "Opening balance", None, TransactionType::Purchase)
            .await
            .expect("Error funding account");
    }
    system.accounts.insert(email, account);
}

#[given(expr = "the classifier says the device is made by {string}")]
async fn classifier_says(world: &mut VerificationWorld, manufacturer: String) {
    world.system().provider.classify_as(&manufacturer);
}

#[given(expr = "service {int} answers with {string}")]
async fn service_answers(world: &mut VerificationWorld, service: u16, payload: String) {
    let object: Value = serde_json::from_str(&payload).expect("Service payload is not valid JSON");
    world.system().provider.succeed(service, object);
}

#[given(expr = "service {int} is down")]
async fn service_is_down(world: &mut VerificationWorld, service: u16) {
    world.system().provider.fail(service);
}
