use serde::{Deserialize, Serialize};

/// Snapshot of a user's attempt counters. `paid` only ever grows through
/// credits (purchases, bonuses, referrals); `used` only ever grows through
/// spins. `used <= paid` holds at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptBalance {
    pub paid: i64,
    pub used: i64,
}

impl AttemptBalance {
    pub fn remaining(&self) -> i64 {
        self.paid - self.used
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferralSummary {
    pub code: Option<String>,
    pub referred_by: Option<i64>,
    pub referrals_count: i64,
}
