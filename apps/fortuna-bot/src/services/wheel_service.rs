use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use fortuna_db::models::PrizeRecord;
use fortuna_db::{LedgerError, LedgerStore};

use crate::wheel::{PrizeWheel, WheelPrize};

/// What a single spin produced, for the front end to render.
#[derive(Debug, Clone, Serialize)]
pub struct SpinOutcome {
    pub prize: WheelPrize,
    pub bonus_attempts: i64,
    pub remaining: i64,
}

/// Spin orchestration: consume one attempt, draw, apply the bonus side
/// effect, log the prize. The consume happens first, so each draw can
/// grant at most one bonus credit and `used <= paid` can never break.
#[derive(Clone)]
pub struct WheelService {
    store: Arc<dyn LedgerStore>,
    wheel: Arc<PrizeWheel>,
}

impl WheelService {
    pub fn new(store: Arc<dyn LedgerStore>, wheel: Arc<PrizeWheel>) -> Self {
        Self { store, wheel }
    }

    pub async fn spin(&self, user_id: i64) -> Result<SpinOutcome, LedgerError> {
        if !self.store.consume(user_id, 1).await? {
            return Err(LedgerError::InsufficientAttempts);
        }

        let prize = self.wheel.draw().clone();
        let bonus_attempts = prize.bonus_attempts().unwrap_or(0);
        if bonus_attempts > 0 {
            // Second, independent credit path next to purchases.
            self.store.credit(user_id, bonus_attempts).await?;
        }
        self.store
            .record_prize(user_id, prize.kind, prize.value)
            .await?;

        let balance = self.store.balance(user_id).await?;
        info!(
            "User {} spun the wheel: {} ({}), {} attempt(s) remaining",
            user_id,
            prize.title,
            prize.segment,
            balance.remaining()
        );

        Ok(SpinOutcome {
            prize,
            bonus_attempts,
            remaining: balance.remaining(),
        })
    }

    pub async fn unclaimed_prizes(&self, user_id: i64) -> Result<Vec<PrizeRecord>, LedgerError> {
        self.store.unclaimed_prizes(user_id).await
    }

    pub async fn claim_prize(&self, prize_id: i64) -> Result<(), LedgerError> {
        self.store.claim_prize(prize_id).await
    }
}
