use thiserror::Error;

use crate::models::transaction::TransactionStatus;

/// Typed outcomes for every ledger and transaction operation. All of these
/// are recoverable conditions that the caller reports back to the user or
/// admin; none should take the process down.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transaction {0} not found")]
    NotFound(i64),

    #[error("transaction {id} is already {status}")]
    InvalidState { id: i64, status: TransactionStatus },

    #[error("user {0} is not an administrator")]
    PermissionDenied(i64),

    #[error("no attempts remaining")]
    InsufficientAttempts,

    #[error("storage unavailable: {0}")]
    Storage(#[source] sqlx::Error),
}

impl LedgerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err)
    }
}
