use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::LedgerError;
use crate::models::{
    AttemptBalance, PaymentMethod, PrizeKind, PrizeRecord, ReferralSummary, Transaction,
    TransactionOutcome,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Validation ceilings shared by every adapter.
#[derive(Debug, Clone, Copy)]
pub struct LedgerLimits {
    pub max_payment_amount: i64,
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            max_payment_amount: 10_000,
        }
    }
}

/// Which backend to run against. The memory backend holds state for the
/// lifetime of the process only and exists for tests and local dev.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Postgres { database_url: String },
    Memory,
}

/// Open the configured backend behind the common interface.
pub async fn open(
    config: &StoreConfig,
    limits: LedgerLimits,
) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match config {
        StoreConfig::Postgres { database_url } => {
            let pool = crate::connect(database_url).await?;
            Ok(Arc::new(PgLedgerStore::new(pool, limits)))
        }
        StoreConfig::Memory => {
            tracing::warn!("Using in-memory store; all state is lost on restart");
            Ok(Arc::new(MemoryLedgerStore::new(limits)))
        }
    }
}

/// The single storage interface behind the attempt ledger, the transaction
/// log, the prize log and the payment-method list. Both adapters guarantee
/// the same atomicity: every method is one atomic step with respect to
/// concurrent callers, so callers never coordinate mutations themselves.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // Attempt ledger.

    /// Read-only; unknown users read as all-zero without creating a row.
    async fn balance(&self, user_id: i64) -> Result<AttemptBalance, LedgerError>;

    /// `paid += attempts`, creating the account if absent. An unconditional
    /// increment: at-most-once semantics belong to the approval workflow.
    async fn credit(&self, user_id: i64, attempts: i64) -> Result<(), LedgerError>;

    /// Check-and-increment: if `remaining >= count` then `used += count`
    /// and `true`; otherwise `false` and no mutation. Atomic per user.
    async fn consume(&self, user_id: i64, count: i64) -> Result<bool, LedgerError>;

    /// Credit `attempts` at most once per calendar day per user. Returns
    /// whether today's bonus was granted by this call.
    async fn claim_daily_bonus(
        &self,
        user_id: i64,
        today: NaiveDate,
        attempts: i64,
    ) -> Result<bool, LedgerError>;

    // Referrals.

    /// Assign the account's referral code if it has none yet, returning the
    /// effective code.
    async fn ensure_referral_code(&self, user_id: i64) -> Result<String, LedgerError>;

    /// Link `user_id` to the owner of `code` and credit `bonus` attempts to
    /// both sides, all at most once per account. Unknown codes,
    /// self-referral and already-linked accounts return `Ok(None)`.
    async fn link_referral(
        &self,
        user_id: i64,
        code: &str,
        bonus: i64,
    ) -> Result<Option<i64>, LedgerError>;

    async fn referral_summary(&self, user_id: i64) -> Result<ReferralSummary, LedgerError>;

    // Transaction log.

    async fn create_transaction(
        &self,
        user_id: i64,
        amount: i64,
        attempts: i64,
    ) -> Result<Transaction, LedgerError>;

    async fn transaction(&self, id: i64) -> Result<Transaction, LedgerError>;

    /// The user's most recent pending transaction, if any.
    async fn pending_transaction(&self, user_id: i64) -> Result<Option<Transaction>, LedgerError>;

    async fn transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>, LedgerError>;

    /// Attach a receipt reference to the caller's own pending transaction.
    /// A transaction owned by somebody else reads as `NotFound`.
    async fn attach_receipt(
        &self,
        id: i64,
        user_id: i64,
        receipt_id: &str,
    ) -> Result<Transaction, LedgerError>;

    /// Compare-and-swap `pending -> completed | declined`. Of two
    /// concurrent calls on the same id exactly one succeeds; the other
    /// observes `InvalidState`.
    async fn finalize_transaction(
        &self,
        id: i64,
        outcome: TransactionOutcome,
        admin_id: i64,
    ) -> Result<Transaction, LedgerError>;

    // Prize log.

    async fn record_prize(
        &self,
        user_id: i64,
        kind: PrizeKind,
        value: &str,
    ) -> Result<i64, LedgerError>;

    async fn unclaimed_prizes(&self, user_id: i64) -> Result<Vec<PrizeRecord>, LedgerError>;

    async fn claim_prize(&self, prize_id: i64) -> Result<(), LedgerError>;

    // Payment methods.

    async fn active_payment_methods(&self) -> Result<Vec<PaymentMethod>, LedgerError>;

    /// `false` when a method with this name already exists.
    async fn add_payment_method(&self, name: &str, details: &str) -> Result<bool, LedgerError>;

    async fn update_payment_method(
        &self,
        id: i64,
        name: &str,
        details: &str,
    ) -> Result<bool, LedgerError>;

    async fn toggle_payment_method(&self, id: i64) -> Result<(), LedgerError>;

    async fn delete_payment_method(&self, id: i64) -> Result<(), LedgerError>;
}

pub(crate) fn ensure_positive(what: &str, value: i64) -> Result<(), LedgerError> {
    if value <= 0 {
        return Err(LedgerError::invalid(format!(
            "{what} must be positive, got {value}"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_order_valid(
    amount: i64,
    attempts: i64,
    limits: &LedgerLimits,
) -> Result<(), LedgerError> {
    ensure_positive("amount", amount)?;
    ensure_positive("attempts", attempts)?;
    if amount > limits.max_payment_amount {
        return Err(LedgerError::invalid(format!(
            "amount {} exceeds the maximum of {}",
            amount, limits.max_payment_amount
        )));
    }
    Ok(())
}
