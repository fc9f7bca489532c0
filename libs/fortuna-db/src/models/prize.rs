use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of thing a wheel segment pays out. `BonusAttempts` is the one
/// kind with a ledger side effect; the rest are fulfilled off-system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrizeKind {
    Money,
    BonusAttempts,
    Discount,
    Other,
}

impl PrizeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Money => "money",
            Self::BonusAttempts => "attempt",
            Self::Discount => "discount",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "money" => Some(Self::Money),
            "attempt" => Some(Self::BonusAttempts),
            "discount" => Some(Self::Discount),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// One recorded wheel outcome, kept for fulfillment and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrizeRecord {
    pub id: i64,
    pub user_id: i64,
    pub kind: PrizeKind,
    pub value: String,
    pub is_claimed: bool,
    pub created_at: DateTime<Utc>,
}
