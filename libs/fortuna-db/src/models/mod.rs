pub mod ledger;
pub mod payment_method;
pub mod prize;
pub mod transaction;

pub use ledger::{AttemptBalance, ReferralSummary};
pub use payment_method::PaymentMethod;
pub use prize::{PrizeKind, PrizeRecord};
pub use transaction::{Transaction, TransactionOutcome, TransactionStatus};
