use std::future::Future;

use crate::{
    db_types::{CreditTransaction, LedgerUpdate, NewCreditTransaction, UserAccount, UserId},
    traits::VerificationDatabase,
};

/// User balances and the append-only credit ledger.
///
/// Implementations must keep `balance == sum(amounts)` for every user at all times: the balance change and the ledger
/// row are written in the same atomic unit, and concurrent changes for the same user must not interleave.
pub trait LedgerManagement: VerificationDatabase {
    /// Returns the account for `email`, creating an empty one if necessary.
    fn fetch_or_create_user(&self, email: &str) -> impl Future<Output = Result<UserAccount, Self::Error>> + Send;

    fn fetch_user_account(&self, user_id: UserId)
        -> impl Future<Output = Result<Option<UserAccount>, Self::Error>> + Send;

    /// Appends `entry` to the ledger and changes the balance by its amount.
    ///
    /// Entries carrying an idempotency key or external reference that is already in the ledger are not applied again
    /// ([`LedgerUpdate::Duplicate`]). Entries that would make the balance negative are refused
    /// ([`LedgerUpdate::InsufficientFunds`]).
    fn apply_transaction(
        &self,
        entry: NewCreditTransaction,
    ) -> impl Future<Output = Result<LedgerUpdate, Self::Error>> + Send;

    /// All ledger entries for the user, oldest first
    fn fetch_transactions(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<CreditTransaction>, Self::Error>> + Send;

    fn fetch_transaction_by_external_ref(
        &self,
        external_ref: &str,
    ) -> impl Future<Output = Result<Option<CreditTransaction>, Self::Error>> + Send;

    fn fetch_transactions_for_order(
        &self,
        order_ref: i64,
    ) -> impl Future<Output = Result<Vec<CreditTransaction>, Self::Error>> + Send;
}
