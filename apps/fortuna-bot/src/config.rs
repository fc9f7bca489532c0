use std::env;

use anyhow::{Context, Result, bail};
use fortuna_db::{LedgerLimits, StoreConfig};

/// Runtime configuration, read from the environment (`.env` is loaded by
/// `main` before this runs).
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    /// Identities allowed to approve or decline payments. Usually one id;
    /// a comma-separated list is accepted.
    pub admin_ids: Vec<i64>,
    /// When unset, the bot runs on the in-memory store.
    pub database_url: Option<String>,
    pub max_payment_amount: i64,
    pub daily_bonus_attempts: i64,
    pub referral_bonus_attempts: i64,
}

impl BotConfig {
    pub fn load() -> Result<Self> {
        let bot_token = env::var("BOT_TOKEN").context("BOT_TOKEN is not set")?;

        let admin_raw = env::var("ADMIN_ID").context("ADMIN_ID is not set")?;
        let admin_ids = admin_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>()
                    .with_context(|| format!("ADMIN_ID entry '{s}' is not a valid id"))
            })
            .collect::<Result<Vec<_>>>()?;
        if admin_ids.is_empty() {
            bail!("ADMIN_ID must contain at least one id");
        }

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        Ok(Self {
            bot_token,
            admin_ids,
            database_url,
            max_payment_amount: int_env("MAX_PAYMENT_AMOUNT", 10_000)?,
            daily_bonus_attempts: int_env("DAILY_BONUS", 1)?,
            referral_bonus_attempts: int_env("REFERRAL_BONUS", 1)?,
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        match &self.database_url {
            Some(url) => StoreConfig::Postgres {
                database_url: url.clone(),
            },
            None => StoreConfig::Memory,
        }
    }

    pub fn limits(&self) -> LedgerLimits {
        LedgerLimits {
            max_payment_amount: self.max_payment_amount,
        }
    }
}

fn int_env(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .with_context(|| format!("{key} must be an integer, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
