use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use fortuna_db::models::{AttemptBalance, ReferralSummary};
use fortuna_db::{LedgerError, LedgerStore};

/// Read side of the attempt ledger plus the two non-purchase credit paths
/// (daily bonus, referral). All mutation goes through the store's atomic
/// operations; this service never touches counters directly.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    daily_bonus_attempts: i64,
    referral_bonus_attempts: i64,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        daily_bonus_attempts: i64,
        referral_bonus_attempts: i64,
    ) -> Self {
        Self {
            store,
            daily_bonus_attempts,
            referral_bonus_attempts,
        }
    }

    pub fn daily_bonus_attempts(&self) -> i64 {
        self.daily_bonus_attempts
    }

    pub async fn balance(&self, user_id: i64) -> Result<AttemptBalance, LedgerError> {
        self.store.balance(user_id).await
    }

    /// One credit per user per calendar day; repeated claims read `false`.
    pub async fn claim_daily_bonus(&self, user_id: i64) -> Result<bool, LedgerError> {
        let today = Utc::now().date_naive();
        let granted = self
            .store
            .claim_daily_bonus(user_id, today, self.daily_bonus_attempts)
            .await?;
        if granted {
            info!(
                "User {} claimed the daily bonus (+{} attempts)",
                user_id, self.daily_bonus_attempts
            );
        }
        Ok(granted)
    }

    /// Link a fresh user to the owner of `code`; credits both sides at
    /// most once. `None` when the code is unknown, self-owned, or the user
    /// was already linked.
    pub async fn apply_referral(
        &self,
        user_id: i64,
        code: &str,
    ) -> Result<Option<i64>, LedgerError> {
        let referrer = self
            .store
            .link_referral(user_id, code, self.referral_bonus_attempts)
            .await?;
        if let Some(referrer_id) = referrer {
            info!(
                "User {} joined via referral code of {}; both credited {} attempt(s)",
                user_id, referrer_id, self.referral_bonus_attempts
            );
        }
        Ok(referrer)
    }

    pub async fn ensure_referral_code(&self, user_id: i64) -> Result<String, LedgerError> {
        self.store.ensure_referral_code(user_id).await
    }

    pub async fn referral_summary(&self, user_id: i64) -> Result<ReferralSummary, LedgerError> {
        self.store.referral_summary(user_id).await
    }
}
