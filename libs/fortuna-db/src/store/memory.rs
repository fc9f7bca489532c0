use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::error::LedgerError;
use crate::models::{
    AttemptBalance, PaymentMethod, PrizeKind, PrizeRecord, ReferralSummary, Transaction,
    TransactionOutcome, TransactionStatus,
};
use crate::store::{LedgerLimits, LedgerStore, ensure_order_valid, ensure_positive};

#[derive(Debug, Default, Clone)]
struct Account {
    paid: i64,
    used: i64,
    last_bonus_date: Option<NaiveDate>,
    referral_code: Option<String>,
    referred_by: Option<i64>,
    referrals_count: i64,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<i64, Account>,
    transactions: BTreeMap<i64, Transaction>,
    next_transaction_id: i64,
    prizes: Vec<PrizeRecord>,
    next_prize_id: i64,
    methods: Vec<PaymentMethod>,
    next_method_id: i64,
}

/// Process-memory adapter. One mutex over the whole state makes every
/// trait operation a single critical section; the lock is never held
/// across an await point.
#[derive(Debug)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
    limits: LedgerLimits,
}

impl MemoryLedgerStore {
    pub fn new(limits: LedgerLimits) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            limits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means some holder panicked mid-read; the
        // counters themselves are updated in single assignments.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new(LedgerLimits::default())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn balance(&self, user_id: i64) -> Result<AttemptBalance, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .accounts
            .get(&user_id)
            .map(|a| AttemptBalance {
                paid: a.paid,
                used: a.used,
            })
            .unwrap_or_default())
    }

    async fn credit(&self, user_id: i64, attempts: i64) -> Result<(), LedgerError> {
        ensure_positive("attempts", attempts)?;
        let mut inner = self.lock();
        let account = inner.accounts.entry(user_id).or_default();
        account.paid += attempts;
        Ok(())
    }

    async fn consume(&self, user_id: i64, count: i64) -> Result<bool, LedgerError> {
        ensure_positive("count", count)?;
        let mut inner = self.lock();
        let Some(account) = inner.accounts.get_mut(&user_id) else {
            return Ok(false);
        };
        if account.paid - account.used < count {
            return Ok(false);
        }
        account.used += count;
        Ok(true)
    }

    async fn claim_daily_bonus(
        &self,
        user_id: i64,
        today: NaiveDate,
        attempts: i64,
    ) -> Result<bool, LedgerError> {
        ensure_positive("attempts", attempts)?;
        let mut inner = self.lock();
        let account = inner.accounts.entry(user_id).or_default();
        if account.last_bonus_date == Some(today) {
            return Ok(false);
        }
        account.last_bonus_date = Some(today);
        account.paid += attempts;
        Ok(true)
    }

    async fn ensure_referral_code(&self, user_id: i64) -> Result<String, LedgerError> {
        let mut inner = self.lock();
        let account = inner.accounts.entry(user_id).or_default();
        if account.referral_code.is_none() {
            account.referral_code = Some(user_id.to_string());
        }
        Ok(account
            .referral_code
            .clone()
            .unwrap_or_else(|| user_id.to_string()))
    }

    async fn link_referral(
        &self,
        user_id: i64,
        code: &str,
        bonus: i64,
    ) -> Result<Option<i64>, LedgerError> {
        ensure_positive("bonus", bonus)?;
        let mut inner = self.lock();

        let referrer_id = inner
            .accounts
            .iter()
            .find(|(_, a)| a.referral_code.as_deref() == Some(code))
            .map(|(id, _)| *id);
        let Some(referrer_id) = referrer_id else {
            return Ok(None);
        };
        if referrer_id == user_id {
            return Ok(None);
        }

        let account = inner.accounts.entry(user_id).or_default();
        if account.referred_by.is_some() {
            return Ok(None);
        }
        account.referred_by = Some(referrer_id);
        account.paid += bonus;

        let referrer = inner.accounts.entry(referrer_id).or_default();
        referrer.referrals_count += 1;
        referrer.paid += bonus;

        Ok(Some(referrer_id))
    }

    async fn referral_summary(&self, user_id: i64) -> Result<ReferralSummary, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .accounts
            .get(&user_id)
            .map(|a| ReferralSummary {
                code: a.referral_code.clone(),
                referred_by: a.referred_by,
                referrals_count: a.referrals_count,
            })
            .unwrap_or_default())
    }

    async fn create_transaction(
        &self,
        user_id: i64,
        amount: i64,
        attempts: i64,
    ) -> Result<Transaction, LedgerError> {
        ensure_order_valid(amount, attempts, &self.limits)?;
        let mut inner = self.lock();
        inner.next_transaction_id += 1;
        let tx = Transaction {
            id: inner.next_transaction_id,
            user_id,
            amount,
            attempts,
            status: TransactionStatus::Pending,
            receipt_id: None,
            admin_id: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        inner.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn transaction(&self, id: i64) -> Result<Transaction, LedgerError> {
        let inner = self.lock();
        inner
            .transactions
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    async fn pending_transaction(&self, user_id: i64) -> Result<Option<Transaction>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .transactions
            .values()
            .rev()
            .find(|t| t.user_id == user_id && t.is_pending())
            .cloned())
    }

    async fn transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .transactions
            .values()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn attach_receipt(
        &self,
        id: i64,
        user_id: i64,
        receipt_id: &str,
    ) -> Result<Transaction, LedgerError> {
        let mut inner = self.lock();
        let tx = inner
            .transactions
            .get_mut(&id)
            .ok_or(LedgerError::NotFound(id))?;
        if tx.user_id != user_id {
            return Err(LedgerError::NotFound(id));
        }
        if !tx.is_pending() {
            return Err(LedgerError::InvalidState {
                id,
                status: tx.status,
            });
        }
        tx.receipt_id = Some(receipt_id.to_string());
        tx.updated_at = Some(Utc::now());
        Ok(tx.clone())
    }

    async fn finalize_transaction(
        &self,
        id: i64,
        outcome: TransactionOutcome,
        admin_id: i64,
    ) -> Result<Transaction, LedgerError> {
        let mut inner = self.lock();
        let tx = inner
            .transactions
            .get_mut(&id)
            .ok_or(LedgerError::NotFound(id))?;
        if !tx.is_pending() {
            return Err(LedgerError::InvalidState {
                id,
                status: tx.status,
            });
        }
        tx.status = outcome.status();
        tx.admin_id = Some(admin_id);
        tx.updated_at = Some(Utc::now());
        Ok(tx.clone())
    }

    async fn record_prize(
        &self,
        user_id: i64,
        kind: PrizeKind,
        value: &str,
    ) -> Result<i64, LedgerError> {
        let mut inner = self.lock();
        inner.next_prize_id += 1;
        let id = inner.next_prize_id;
        inner.prizes.push(PrizeRecord {
            id,
            user_id,
            kind,
            value: value.to_string(),
            is_claimed: false,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn unclaimed_prizes(&self, user_id: i64) -> Result<Vec<PrizeRecord>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .prizes
            .iter()
            .filter(|p| p.user_id == user_id && !p.is_claimed)
            .cloned()
            .collect())
    }

    async fn claim_prize(&self, prize_id: i64) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if let Some(prize) = inner.prizes.iter_mut().find(|p| p.id == prize_id) {
            prize.is_claimed = true;
        }
        Ok(())
    }

    async fn active_payment_methods(&self) -> Result<Vec<PaymentMethod>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .methods
            .iter()
            .filter(|m| m.is_active)
            .cloned()
            .collect())
    }

    async fn add_payment_method(&self, name: &str, details: &str) -> Result<bool, LedgerError> {
        let mut inner = self.lock();
        if inner.methods.iter().any(|m| m.name == name) {
            return Ok(false);
        }
        inner.next_method_id += 1;
        let id = inner.next_method_id;
        inner.methods.push(PaymentMethod {
            id,
            name: name.to_string(),
            details: details.to_string(),
            is_active: true,
        });
        Ok(true)
    }

    async fn update_payment_method(
        &self,
        id: i64,
        name: &str,
        details: &str,
    ) -> Result<bool, LedgerError> {
        let mut inner = self.lock();
        match inner.methods.iter_mut().find(|m| m.id == id) {
            Some(method) => {
                method.name = name.to_string();
                method.details = details.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn toggle_payment_method(&self, id: i64) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if let Some(method) = inner.methods.iter_mut().find(|m| m.id == id) {
            method.is_active = !method.is_active;
        }
        Ok(())
    }

    async fn delete_payment_method(&self, id: i64) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        inner.methods.retain(|m| m.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn store() -> MemoryLedgerStore {
        MemoryLedgerStore::default()
    }

    #[tokio::test]
    async fn unknown_user_reads_as_zero_without_side_effects() {
        let store = store();
        let balance = store.balance(42).await.unwrap();
        assert_eq!(balance, AttemptBalance::default());
        assert_eq!(balance.remaining(), 0);

        // The read must be indistinguishable from a real zero-balance
        // account: nothing was created.
        assert!(store.lock().accounts.is_empty());
    }

    #[tokio::test]
    async fn credit_then_consume_keeps_counters_monotonic() {
        let store = store();
        store.credit(1, 3).await.unwrap();
        assert!(store.consume(1, 1).await.unwrap());
        assert!(store.consume(1, 2).await.unwrap());

        let balance = store.balance(1).await.unwrap();
        assert_eq!(balance.paid, 3);
        assert_eq!(balance.used, 3);
        assert_eq!(balance.remaining(), 0);

        assert!(!store.consume(1, 1).await.unwrap());
        assert_eq!(store.balance(1).await.unwrap().used, 3);
    }

    #[tokio::test]
    async fn non_positive_counts_are_rejected_before_mutation() {
        let store = store();
        assert!(matches!(
            store.credit(1, 0).await,
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.consume(1, -1).await,
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(store.balance(1).await.unwrap(), AttemptBalance::default());
    }

    #[tokio::test]
    async fn create_transaction_validates_amount_and_attempts() {
        let store = store();
        for (amount, attempts) in [(0, 1), (-50, 1), (50, 0), (50, -3), (10_001, 1)] {
            assert!(matches!(
                store.create_transaction(1, amount, attempts).await,
                Err(LedgerError::InvalidArgument(_))
            ));
        }
        assert!(store.transactions_for_user(1).await.unwrap().is_empty());

        let tx = store.create_transaction(1, 10_000, 10).await.unwrap();
        assert!(tx.is_pending());
    }

    #[tokio::test]
    async fn finalize_is_a_one_shot_transition() {
        let store = store();
        let tx = store.create_transaction(7, 50, 1).await.unwrap();

        let done = store
            .finalize_transaction(tx.id, TransactionOutcome::Completed, 99)
            .await
            .unwrap();
        assert_eq!(done.status, TransactionStatus::Completed);
        assert_eq!(done.admin_id, Some(99));

        let again = store
            .finalize_transaction(tx.id, TransactionOutcome::Completed, 99)
            .await;
        assert!(matches!(
            again,
            Err(LedgerError::InvalidState {
                status: TransactionStatus::Completed,
                ..
            })
        ));

        // Declining a completed transaction is just as invalid.
        let declined = store
            .finalize_transaction(tx.id, TransactionOutcome::Declined, 99)
            .await;
        assert!(matches!(declined, Err(LedgerError::InvalidState { .. })));

        assert!(matches!(
            store
                .finalize_transaction(424_242, TransactionOutcome::Declined, 99)
                .await,
            Err(LedgerError::NotFound(424_242))
        ));
    }

    #[tokio::test]
    async fn receipts_attach_only_to_own_pending_transactions() {
        let store = store();
        let tx = store.create_transaction(1, 50, 1).await.unwrap();

        // Wrong owner reads as NotFound, not as a distinct error.
        assert!(matches!(
            store.attach_receipt(tx.id, 2, "r-1").await,
            Err(LedgerError::NotFound(_))
        ));

        let updated = store.attach_receipt(tx.id, 1, "r-1").await.unwrap();
        assert_eq!(updated.receipt_id.as_deref(), Some("r-1"));

        store
            .finalize_transaction(tx.id, TransactionOutcome::Declined, 99)
            .await
            .unwrap();
        assert!(matches!(
            store.attach_receipt(tx.id, 1, "r-2").await,
            Err(LedgerError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn pending_transaction_returns_latest_pending_only() {
        let store = store();
        let first = store.create_transaction(1, 50, 1).await.unwrap();
        let second = store.create_transaction(1, 130, 3).await.unwrap();
        store.create_transaction(2, 200, 5).await.unwrap();

        assert_eq!(
            store.pending_transaction(1).await.unwrap().map(|t| t.id),
            Some(second.id)
        );

        store
            .finalize_transaction(second.id, TransactionOutcome::Declined, 99)
            .await
            .unwrap();
        assert_eq!(
            store.pending_transaction(1).await.unwrap().map(|t| t.id),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn daily_bonus_is_once_per_day() {
        let store = store();
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

        assert!(store.claim_daily_bonus(1, day1, 1).await.unwrap());
        assert!(!store.claim_daily_bonus(1, day1, 1).await.unwrap());
        assert_eq!(store.balance(1).await.unwrap().paid, 1);

        assert!(store.claim_daily_bonus(1, day2, 1).await.unwrap());
        assert_eq!(store.balance(1).await.unwrap().paid, 2);
    }

    #[tokio::test]
    async fn referral_links_at_most_once_and_credits_both_sides() {
        let store = store();
        let code = store.ensure_referral_code(100).await.unwrap();

        assert_eq!(store.link_referral(200, "missing", 1).await.unwrap(), None);
        assert_eq!(store.link_referral(100, &code, 1).await.unwrap(), None);

        assert_eq!(
            store.link_referral(200, &code, 1).await.unwrap(),
            Some(100)
        );
        // A second /start with the same code must not credit again.
        assert_eq!(store.link_referral(200, &code, 1).await.unwrap(), None);

        assert_eq!(store.balance(100).await.unwrap().paid, 1);
        assert_eq!(store.balance(200).await.unwrap().paid, 1);

        let summary = store.referral_summary(100).await.unwrap();
        assert_eq!(summary.referrals_count, 1);
        let linked = store.referral_summary(200).await.unwrap();
        assert_eq!(linked.referred_by, Some(100));
    }

    #[tokio::test]
    async fn prize_log_tracks_claims() {
        let store = store();
        let id = store.record_prize(1, PrizeKind::Money, "100").await.unwrap();
        store
            .record_prize(1, PrizeKind::Other, "gift")
            .await
            .unwrap();

        assert_eq!(store.unclaimed_prizes(1).await.unwrap().len(), 2);
        store.claim_prize(id).await.unwrap();
        let left = store.unclaimed_prizes(1).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].value, "gift");
    }

    #[tokio::test]
    async fn payment_methods_enforce_unique_names() {
        let store = store();
        assert!(store.add_payment_method("card", "1234 5678").await.unwrap());
        assert!(!store.add_payment_method("card", "other").await.unwrap());

        let methods = store.active_payment_methods().await.unwrap();
        assert_eq!(methods.len(), 1);

        store.toggle_payment_method(methods[0].id).await.unwrap();
        assert!(store.active_payment_methods().await.unwrap().is_empty());

        store.toggle_payment_method(methods[0].id).await.unwrap();
        assert!(
            store
                .update_payment_method(methods[0].id, "card", "8765 4321")
                .await
                .unwrap()
        );
        store.delete_payment_method(methods[0].id).await.unwrap();
        assert!(store.active_payment_methods().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_spins_cannot_overdraw_one_remaining_attempt() {
        let store = Arc::new(store());
        store.credit(1, 1).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.consume(1, 1).await }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        let balance = store.balance(1).await.unwrap();
        assert_eq!(balance.used, 1);
        assert_eq!(balance.remaining(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_finalizes_resolve_exactly_once() {
        let store = Arc::new(store());
        let tx = store.create_transaction(1, 50, 5).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = tx.id;
            handles.push(tokio::spawn(async move {
                store
                    .finalize_transaction(id, TransactionOutcome::Completed, 99)
                    .await
            }));
        }

        let mut wins = 0;
        let mut losses = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(LedgerError::InvalidState { .. }) => losses += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(losses, 7);
    }
}
