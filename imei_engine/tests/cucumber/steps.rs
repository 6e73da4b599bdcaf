use std::str::FromStr;

use cucumber::{then, when};
use imei_common::Credits;
use imei_engine::{
    brands::Brand,
    db_types::{OrderStatusType, PaymentStatus, TransactionType},
    traits::OrderManagement,
    GuestRequest,
    VerificationRequest,
};

use crate::cucumber::VerificationWorld;

fn parse_addons(addons: &str) -> Vec<u16> {
    addons.split(',').filter_map(|s| s.trim().parse().ok()).collect()
}

#[when(expr = "{string} submits IMEI {word} declared as {word}")]
async fn submit(world: &mut VerificationWorld, email: String, imei: String, brand: String) {
    submit_with_addons(world, email, imei, brand, String::new()).await;
}

#[when(expr = "{string} submits IMEI {word} declared as {word} with add-ons {string}")]
async fn submit_with_addons(world: &mut VerificationWorld, email: String, imei: String, brand: String, addons: String) {
    let system = world.system_mut();
    let user_id = system.account(&email).id;
    let mut request = VerificationRequest::new(user_id, imei).with_addons(parse_addons(&addons));
    if let Ok(brand) = Brand::from_str(&brand) {
        request = request.with_brand(brand);
    }
    match system.submission.submit(request).await {
        Ok(order) => {
            system.last_order = Some(order);
            system.last_error = None;
        },
        Err(e) => system.last_error = Some(e.to_string()),
    }
}

#[when(expr = "a guest {string} orders a check of IMEI {word} for a {string} with session {string}")]
async fn guest_order(world: &mut VerificationWorld, email: String, imei: String, brand: String, session: String) {
    let system = world.system_mut();
    match system.submission.submit_guest(GuestRequest::new(email, imei, brand, session)).await {
        Ok(order) => {
            system.last_order = Some(order);
            system.last_error = None;
        },
        Err(e) => system.last_error = Some(e.to_string()),
    }
}

#[when(expr = "the payment provider confirms session {string}")]
async fn confirm_session(world: &mut VerificationWorld, session: String) {
    world.system().reconciler.confirm_guest_payment(&session).await.expect("Error confirming payment");
}

#[when(expr = "the payment provider reports session {string} as failed")]
async fn fail_session(world: &mut VerificationWorld, session: String) {
    world.system().reconciler.fail_guest_payment(&session).await.expect("Error failing payment");
}

#[when(expr = "the payment provider confirms purchase {string} of {int} credits for {string}")]
async fn confirm_purchase(world: &mut VerificationWorld, intent: String, credits: i64, email: String) {
    let system = world.system();
    let user_id = system.account(&email).id;
    system
        .reconciler
        .confirm_credit_purchase(user_id, &intent, Credits::from_whole(credits))
        .await
        .expect("Error confirming purchase");
}

#[when("the workers process the queue")]
async fn process_queue(world: &mut VerificationWorld) {
    let system = world.system_mut();
    system.queue.drain(&system.processor).await.expect("Error processing the queue");
    if let Some(id) = system.last_order.as_ref().map(|o| o.id) {
        system.last_order = system.db.fetch_order(id).await.expect("Error fetching order");
    }
}

#[then(expr = "{string} has a balance of {word} credits")]
async fn check_balance(world: &mut VerificationWorld, email: String, balance: String) {
    let system = world.system();
    let expected = Credits::from_str(&balance).expect("Not a valid credit amount");
    let actual = system.ledger.balance(system.account(&email).id).await.expect("Error fetching balance");
    assert_eq!(actual, expected, "Balance of {email} is incorrect");
}

#[then(expr = "the ledger of {string} has {int} {word} entries")]
async fn check_entry_count(world: &mut VerificationWorld, email: String, count: usize, tx_type: String) {
    let system = world.system();
    let history = system.ledger.history(system.account(&email).id).await.expect("Error fetching history");
    let matching = history
        .iter()
        .filter(|tx| tx_type == "ledger" || TransactionType::from(tx_type.clone()) == tx.tx_type)
        .count();
    assert_eq!(matching, count, "Wrong number of {tx_type} entries for {email}");
}

#[then(expr = "the ledger of {string} is consistent")]
async fn check_ledger(world: &mut VerificationWorld, email: String) {
    let system = world.system();
    let audit = system.ledger.audit(system.account(&email).id).await.expect("Error auditing ledger");
    assert!(audit.is_consistent(), "Ledger of {email} does not add up: {audit:?}");
}

#[then(expr = "the order is {word}")]
async fn check_status(world: &mut VerificationWorld, status: String) {
    let expected = OrderStatusType::from_str(&status).expect("Not a valid order status");
    assert_eq!(world.system().last_order().status, expected);
}

#[then(expr = "the order's payment is {word}")]
async fn check_payment_status(world: &mut VerificationWorld, status: String) {
    let expected = PaymentStatus::from_str(&status).expect("Not a valid payment status");
    let system = world.system();
    let order = system.db.fetch_order(system.last_order().id).await.expect("Error fetching order").unwrap();
    assert_eq!(order.payment_status, expected);
}

#[then(expr = "the order's brand is {word}")]
async fn check_brand(world: &mut VerificationWorld, brand: String) {
    let expected = Brand::from_str(&brand).expect("Not a valid brand");
    assert_eq!(world.system().last_order().brand, Some(expected));
}

#[then(expr = "the order's model is {string}")]
async fn check_model(world: &mut VerificationWorld, model: String) {
    assert_eq!(world.system().last_order().model_name.as_deref(), Some(model.as_str()));
}

#[then(expr = "the order's risk tier is {word}")]
async fn check_risk(world: &mut VerificationWorld, tier: String) {
    let risk = world.system().last_order().risk.clone().expect("The order has no risk assessment");
    assert_eq!(risk.tier.to_string(), tier, "Unexpected risk: {}", risk.summary);
}

#[then(expr = "the guest is shown {int} {word}")]
async fn check_guest_amount(world: &mut VerificationWorld, amount: i64, currency: String) {
    let order = world.system().last_order();
    assert_eq!(order.guest_amount, Some(amount));
    assert_eq!(order.guest_currency.as_deref(), Some(currency.as_str()));
}

#[then(expr = "the submission is refused with {string}")]
async fn check_refusal(world: &mut VerificationWorld, message: String) {
    let error = world.system().last_error.clone().expect("The submission was accepted");
    assert!(error.contains(&message), "Expected '{message}' in '{error}'");
}

#[then(expr = "{int} jobs are queued")]
async fn check_queued(world: &mut VerificationWorld, count: i64) {
    let stats = world.system().queue.stats().await.expect("Error fetching queue stats");
    assert_eq!(stats.queued, count);
}
