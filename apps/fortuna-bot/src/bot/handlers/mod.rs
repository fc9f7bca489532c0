use fortuna_db::LedgerError;

pub mod callback;
pub mod command;

/// Render a ledger error as a short user-facing line.
pub(crate) fn describe_error(err: &LedgerError) -> String {
    match err {
        LedgerError::InvalidArgument(reason) => format!("⚠️ Invalid request: {reason}"),
        LedgerError::NotFound(id) => format!("⚠️ Transaction #{id} was not found."),
        LedgerError::InvalidState { id, status } => {
            format!("⚠️ Transaction #{id} is already {status}.")
        }
        LedgerError::PermissionDenied(_) => "⛔ Only the administrator can do that.".to_string(),
        LedgerError::InsufficientAttempts => "❌ You have no attempts left.".to_string(),
        LedgerError::Storage(_) => {
            "⚠️ Storage is unavailable right now, please try again later.".to_string()
        }
    }
}
