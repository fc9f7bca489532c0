use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::error::LedgerError;
use crate::models::{
    AttemptBalance, PaymentMethod, PrizeKind, PrizeRecord, ReferralSummary, Transaction,
    TransactionOutcome, TransactionStatus,
};
use crate::store::{LedgerLimits, LedgerStore, ensure_order_valid, ensure_positive};

/// How many times a transient storage fault is retried before the
/// operation is reported as unavailable.
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    limits: LedgerLimits,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, limits: LedgerLimits) -> Self {
        Self { pool, limits }
    }

    fn row_to_transaction(row: &PgRow) -> Result<Transaction, LedgerError> {
        let raw_status: String = row.try_get("status")?;
        let status = TransactionStatus::parse(&raw_status).ok_or_else(|| {
            LedgerError::Storage(sqlx::Error::Decode(
                format!("unknown transaction status '{raw_status}'").into(),
            ))
        })?;
        Ok(Transaction {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            amount: row.try_get("amount")?,
            attempts: row.try_get("attempts")?,
            status,
            receipt_id: row.try_get::<Option<String>, _>("receipt_id").ok().flatten(),
            admin_id: row.try_get::<Option<i64>, _>("admin_id").ok().flatten(),
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .unwrap_or_else(|_| Utc::now()),
            updated_at: row
                .try_get::<Option<DateTime<Utc>>, _>("updated_at")
                .ok()
                .flatten(),
        })
    }

    fn row_to_prize(row: &PgRow) -> Result<PrizeRecord, LedgerError> {
        let raw_kind: String = row.try_get("prize_type")?;
        let kind = PrizeKind::parse(&raw_kind).unwrap_or(PrizeKind::Other);
        Ok(PrizeRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind,
            value: row.try_get("value")?,
            is_claimed: row.try_get::<bool, _>("is_claimed").unwrap_or(false),
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// Re-read a transaction to tell NotFound from a lost CAS race.
    async fn explain_failed_update(&self, id: i64) -> LedgerError {
        match sqlx::query("SELECT status FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(None) => LedgerError::NotFound(id),
            Ok(Some(row)) => {
                let raw: String = row.try_get("status").unwrap_or_default();
                match TransactionStatus::parse(&raw) {
                    Some(status) => LedgerError::InvalidState { id, status },
                    None => LedgerError::NotFound(id),
                }
            }
            Err(e) => LedgerError::Storage(e),
        }
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

/// Bounded-backoff retry for transient faults only; anything else is
/// surfaced immediately. Business errors never pass through here, this
/// wraps raw sqlx calls.
async fn with_backoff<T, F, Fut>(what: &str, op: F) -> Result<T, LedgerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt < MAX_ATTEMPTS => {
                warn!("{} hit transient storage fault ({}), retry {}/{}", what, e, attempt, MAX_ATTEMPTS);
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(LedgerError::Storage(e)),
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn balance(&self, user_id: i64) -> Result<AttemptBalance, LedgerError> {
        let pool = self.pool.clone();
        let row = with_backoff("balance", move || {
            let pool = pool.clone();
            async move {
                sqlx::query("SELECT paid, used FROM user_attempts WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_optional(&pool)
                    .await
            }
        })
        .await?;

        match row {
            Some(row) => Ok(AttemptBalance {
                paid: row.try_get("paid")?,
                used: row.try_get("used")?,
            }),
            None => Ok(AttemptBalance::default()),
        }
    }

    async fn credit(&self, user_id: i64, attempts: i64) -> Result<(), LedgerError> {
        ensure_positive("attempts", attempts)?;
        let pool = self.pool.clone();
        with_backoff("credit", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO user_attempts (user_id, paid)
                    VALUES ($1, $2)
                    ON CONFLICT (user_id) DO UPDATE SET paid = user_attempts.paid + excluded.paid
                    "#,
                )
                .bind(user_id)
                .bind(attempts)
                .execute(&pool)
                .await
            }
        })
        .await?;
        Ok(())
    }

    async fn consume(&self, user_id: i64, count: i64) -> Result<bool, LedgerError> {
        ensure_positive("count", count)?;
        let pool = self.pool.clone();
        let result = with_backoff("consume", move || {
            let pool = pool.clone();
            async move {
                // Single guarded statement: the row lock makes the
                // check-and-increment atomic against concurrent spins.
                sqlx::query(
                    "UPDATE user_attempts SET used = used + $2 WHERE user_id = $1 AND paid - used >= $2",
                )
                .bind(user_id)
                .bind(count)
                .execute(&pool)
                .await
            }
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_daily_bonus(
        &self,
        user_id: i64,
        today: NaiveDate,
        attempts: i64,
    ) -> Result<bool, LedgerError> {
        ensure_positive("attempts", attempts)?;
        let pool = self.pool.clone();
        let result = with_backoff("claim_daily_bonus", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO user_attempts (user_id, paid, last_bonus_date)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (user_id) DO UPDATE
                        SET paid = user_attempts.paid + excluded.paid,
                            last_bonus_date = excluded.last_bonus_date
                        WHERE user_attempts.last_bonus_date IS DISTINCT FROM excluded.last_bonus_date
                    "#,
                )
                .bind(user_id)
                .bind(attempts)
                .bind(today)
                .execute(&pool)
                .await
            }
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ensure_referral_code(&self, user_id: i64) -> Result<String, LedgerError> {
        let code = user_id.to_string();
        let pool = self.pool.clone();
        let assigned = with_backoff("ensure_referral_code", move || {
            let pool = pool.clone();
            let code = code.clone();
            async move {
                sqlx::query_scalar::<_, String>(
                    r#"
                    INSERT INTO user_attempts (user_id, referral_code)
                    VALUES ($1, $2)
                    ON CONFLICT (user_id) DO UPDATE
                        SET referral_code = COALESCE(user_attempts.referral_code, excluded.referral_code)
                    RETURNING referral_code
                    "#,
                )
                .bind(user_id)
                .bind(code)
                .fetch_one(&pool)
                .await
            }
        })
        .await?;
        Ok(assigned)
    }

    async fn link_referral(
        &self,
        user_id: i64,
        code: &str,
        bonus: i64,
    ) -> Result<Option<i64>, LedgerError> {
        ensure_positive("bonus", bonus)?;
        let pool = self.pool.clone();
        let code = code.to_string();
        with_backoff("link_referral", move || {
            let pool = pool.clone();
            let code = code.clone();
            async move {
                let mut tx = pool.begin().await?;

                let referrer: Option<i64> = sqlx::query_scalar(
                    "SELECT user_id FROM user_attempts WHERE referral_code = $1",
                )
                .bind(&code)
                .fetch_optional(&mut *tx)
                .await?;

                let Some(referrer_id) = referrer else {
                    return Ok(None);
                };
                if referrer_id == user_id {
                    return Ok(None);
                }

                sqlx::query(
                    "INSERT INTO user_attempts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

                // Link at most once per account.
                let linked = sqlx::query(
                    "UPDATE user_attempts SET referred_by = $1 WHERE user_id = $2 AND referred_by IS NULL",
                )
                .bind(referrer_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                if linked.rows_affected() == 0 {
                    return Ok(None);
                }

                sqlx::query(
                    "UPDATE user_attempts SET referrals_count = referrals_count + 1, paid = paid + $1 WHERE user_id = $2",
                )
                .bind(bonus)
                .bind(referrer_id)
                .execute(&mut *tx)
                .await?;

                sqlx::query("UPDATE user_attempts SET paid = paid + $1 WHERE user_id = $2")
                    .bind(bonus)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                Ok(Some(referrer_id))
            }
        })
        .await
    }

    async fn referral_summary(&self, user_id: i64) -> Result<ReferralSummary, LedgerError> {
        let pool = self.pool.clone();
        let row = with_backoff("referral_summary", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    "SELECT referral_code, referred_by, referrals_count FROM user_attempts WHERE user_id = $1",
                )
                .bind(user_id)
                .fetch_optional(&pool)
                .await
            }
        })
        .await?;

        match row {
            Some(row) => Ok(ReferralSummary {
                code: row.try_get::<Option<String>, _>("referral_code").ok().flatten(),
                referred_by: row.try_get::<Option<i64>, _>("referred_by").ok().flatten(),
                referrals_count: row.try_get("referrals_count").unwrap_or_default(),
            }),
            None => Ok(ReferralSummary::default()),
        }
    }

    async fn create_transaction(
        &self,
        user_id: i64,
        amount: i64,
        attempts: i64,
    ) -> Result<Transaction, LedgerError> {
        ensure_order_valid(amount, attempts, &self.limits)?;
        let pool = self.pool.clone();
        let row = with_backoff("create_transaction", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO transactions (user_id, amount, attempts, status)
                    VALUES ($1, $2, $3, 'pending')
                    RETURNING *
                    "#,
                )
                .bind(user_id)
                .bind(amount)
                .bind(attempts)
                .fetch_one(&pool)
                .await
            }
        })
        .await?;
        Self::row_to_transaction(&row)
    }

    async fn transaction(&self, id: i64) -> Result<Transaction, LedgerError> {
        let pool = self.pool.clone();
        let row = with_backoff("transaction", move || {
            let pool = pool.clone();
            async move {
                sqlx::query("SELECT * FROM transactions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&pool)
                    .await
            }
        })
        .await?;
        match row {
            Some(row) => Self::row_to_transaction(&row),
            None => Err(LedgerError::NotFound(id)),
        }
    }

    async fn pending_transaction(&self, user_id: i64) -> Result<Option<Transaction>, LedgerError> {
        let pool = self.pool.clone();
        let row = with_backoff("pending_transaction", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    "SELECT * FROM transactions WHERE user_id = $1 AND status = 'pending' ORDER BY created_at DESC, id DESC LIMIT 1",
                )
                .bind(user_id)
                .fetch_optional(&pool)
                .await
            }
        })
        .await?;
        row.map(|r| Self::row_to_transaction(&r)).transpose()
    }

    async fn transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>, LedgerError> {
        let pool = self.pool.clone();
        let rows = with_backoff("transactions_for_user", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    "SELECT * FROM transactions WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
                )
                .bind(user_id)
                .fetch_all(&pool)
                .await
            }
        })
        .await?;
        rows.iter().map(Self::row_to_transaction).collect()
    }

    async fn attach_receipt(
        &self,
        id: i64,
        user_id: i64,
        receipt_id: &str,
    ) -> Result<Transaction, LedgerError> {
        let pool = self.pool.clone();
        let receipt = receipt_id.to_string();
        let row = with_backoff("attach_receipt", move || {
            let pool = pool.clone();
            let receipt = receipt.clone();
            async move {
                sqlx::query(
                    r#"
                    UPDATE transactions
                    SET receipt_id = $3, updated_at = CURRENT_TIMESTAMP
                    WHERE id = $1 AND user_id = $2 AND status = 'pending'
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(user_id)
                .bind(receipt)
                .fetch_optional(&pool)
                .await
            }
        })
        .await?;

        match row {
            Some(row) => Self::row_to_transaction(&row),
            None => {
                let tx = self.transaction(id).await?;
                // Someone else's transaction reads as NotFound on purpose.
                if tx.user_id != user_id {
                    return Err(LedgerError::NotFound(id));
                }
                Err(LedgerError::InvalidState {
                    id,
                    status: tx.status,
                })
            }
        }
    }

    async fn finalize_transaction(
        &self,
        id: i64,
        outcome: TransactionOutcome,
        admin_id: i64,
    ) -> Result<Transaction, LedgerError> {
        let pool = self.pool.clone();
        let status = outcome.status().as_str();
        let row = with_backoff("finalize_transaction", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    r#"
                    UPDATE transactions
                    SET status = $2, admin_id = $3, updated_at = CURRENT_TIMESTAMP
                    WHERE id = $1 AND status = 'pending'
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(status)
                .bind(admin_id)
                .fetch_optional(&pool)
                .await
            }
        })
        .await?;

        match row {
            Some(row) => Self::row_to_transaction(&row),
            None => Err(self.explain_failed_update(id).await),
        }
    }

    async fn record_prize(
        &self,
        user_id: i64,
        kind: PrizeKind,
        value: &str,
    ) -> Result<i64, LedgerError> {
        let pool = self.pool.clone();
        let value = value.to_string();
        let id = with_backoff("record_prize", move || {
            let pool = pool.clone();
            let value = value.clone();
            async move {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO prizes (user_id, prize_type, value) VALUES ($1, $2, $3) RETURNING id",
                )
                .bind(user_id)
                .bind(kind.as_str())
                .bind(value)
                .fetch_one(&pool)
                .await
            }
        })
        .await?;
        Ok(id)
    }

    async fn unclaimed_prizes(&self, user_id: i64) -> Result<Vec<PrizeRecord>, LedgerError> {
        let pool = self.pool.clone();
        let rows = with_backoff("unclaimed_prizes", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    "SELECT * FROM prizes WHERE user_id = $1 AND is_claimed = FALSE ORDER BY created_at",
                )
                .bind(user_id)
                .fetch_all(&pool)
                .await
            }
        })
        .await?;
        rows.iter().map(Self::row_to_prize).collect()
    }

    async fn claim_prize(&self, prize_id: i64) -> Result<(), LedgerError> {
        let pool = self.pool.clone();
        with_backoff("claim_prize", move || {
            let pool = pool.clone();
            async move {
                sqlx::query("UPDATE prizes SET is_claimed = TRUE WHERE id = $1")
                    .bind(prize_id)
                    .execute(&pool)
                    .await
            }
        })
        .await?;
        Ok(())
    }

    async fn active_payment_methods(&self) -> Result<Vec<PaymentMethod>, LedgerError> {
        let pool = self.pool.clone();
        let rows = with_backoff("active_payment_methods", move || {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    "SELECT id, name, details, is_active FROM payment_methods WHERE is_active = TRUE ORDER BY id",
                )
                .fetch_all(&pool)
                .await
            }
        })
        .await?;
        rows.iter()
            .map(|row| {
                Ok(PaymentMethod {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    details: row.try_get("details")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect()
    }

    async fn add_payment_method(&self, name: &str, details: &str) -> Result<bool, LedgerError> {
        let pool = self.pool.clone();
        let name = name.to_string();
        let details = details.to_string();
        let result = with_backoff("add_payment_method", move || {
            let pool = pool.clone();
            let name = name.clone();
            let details = details.clone();
            async move {
                sqlx::query(
                    "INSERT INTO payment_methods (name, details) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
                )
                .bind(name)
                .bind(details)
                .execute(&pool)
                .await
            }
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_payment_method(
        &self,
        id: i64,
        name: &str,
        details: &str,
    ) -> Result<bool, LedgerError> {
        let pool = self.pool.clone();
        let name = name.to_string();
        let details = details.to_string();
        let result = with_backoff("update_payment_method", move || {
            let pool = pool.clone();
            let name = name.clone();
            let details = details.clone();
            async move {
                sqlx::query("UPDATE payment_methods SET name = $1, details = $2 WHERE id = $3")
                    .bind(name)
                    .bind(details)
                    .bind(id)
                    .execute(&pool)
                    .await
            }
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn toggle_payment_method(&self, id: i64) -> Result<(), LedgerError> {
        let pool = self.pool.clone();
        with_backoff("toggle_payment_method", move || {
            let pool = pool.clone();
            async move {
                sqlx::query("UPDATE payment_methods SET is_active = NOT is_active WHERE id = $1")
                    .bind(id)
                    .execute(&pool)
                    .await
            }
        })
        .await?;
        Ok(())
    }

    async fn delete_payment_method(&self, id: i64) -> Result<(), LedgerError> {
        let pool = self.pool.clone();
        with_backoff("delete_payment_method", move || {
            let pool = pool.clone();
            async move {
                sqlx::query("DELETE FROM payment_methods WHERE id = $1")
                    .bind(id)
                    .execute(&pool)
                    .await
            }
        })
        .await?;
        Ok(())
    }
}
