use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use fortuna_db::models::{PaymentMethod, Transaction, TransactionOutcome};
use fortuna_db::{LedgerError, LedgerStore};

use crate::notifier::Notifier;

/// Fixed price list for attempt packages.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PurchaseTier {
    pub attempts: i64,
    pub price: i64,
}

pub const PURCHASE_TIERS: &[PurchaseTier] = &[
    PurchaseTier { attempts: 1, price: 50 },
    PurchaseTier { attempts: 3, price: 130 },
    PurchaseTier { attempts: 5, price: 200 },
    PurchaseTier { attempts: 10, price: 350 },
];

/// Bridges human approval to ledger mutation. The one hard promise here:
/// a transaction credits the ledger at most once, no matter how many
/// times or how concurrently an admin taps approve.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    admin_ids: Vec<i64>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        admin_ids: Vec<i64>,
    ) -> Self {
        Self {
            store,
            notifier,
            admin_ids,
        }
    }

    pub fn admin_ids(&self) -> &[i64] {
        &self.admin_ids
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn tier_for(attempts: i64) -> Option<PurchaseTier> {
        PURCHASE_TIERS.iter().copied().find(|t| t.attempts == attempts)
    }

    /// Open a purchase: records the intent as a pending transaction that
    /// only an admin can resolve.
    pub async fn request_attempts(
        &self,
        user_id: i64,
        attempts: i64,
    ) -> Result<Transaction, LedgerError> {
        let tier = Self::tier_for(attempts).ok_or_else(|| {
            LedgerError::invalid(format!("no purchase tier offers {attempts} attempts"))
        })?;
        let tx = self
            .store
            .create_transaction(user_id, tier.price, tier.attempts)
            .await?;
        info!(
            "Transaction {} opened: user {} wants {} attempt(s) for {}",
            tx.id, user_id, tier.attempts, tier.price
        );
        Ok(tx)
    }

    /// Record the receipt reference on the user's own pending transaction,
    /// then ask the admins to resolve it. Notification happens strictly
    /// after the store committed the attach.
    pub async fn submit_receipt(
        &self,
        user_id: i64,
        transaction_id: i64,
        receipt_reference: &str,
    ) -> Result<Transaction, LedgerError> {
        let tx = self
            .store
            .attach_receipt(transaction_id, user_id, receipt_reference)
            .await?;

        for admin_id in &self.admin_ids {
            if let Err(e) = self.notifier.request_review(*admin_id, &tx).await {
                warn!(
                    "Failed to notify admin {} about transaction {}: {}",
                    admin_id, tx.id, e
                );
            }
        }
        Ok(tx)
    }

    pub async fn approve(
        &self,
        transaction_id: i64,
        admin_id: i64,
    ) -> Result<Transaction, LedgerError> {
        if !self.is_admin(admin_id) {
            return Err(LedgerError::PermissionDenied(admin_id));
        }

        // Finalize first: the pending -> completed CAS is the exactly-once
        // guard. A second approval fails here with InvalidState and never
        // reaches the credit below.
        let tx = self
            .store
            .finalize_transaction(transaction_id, TransactionOutcome::Completed, admin_id)
            .await?;

        if let Err(e) = self.store.credit(tx.user_id, tx.attempts).await {
            error!(
                "Transaction {} completed but crediting user {} failed: {}",
                tx.id, tx.user_id, e
            );
            return Err(e);
        }
        info!(
            "Transaction {} approved by {}: +{} attempt(s) for user {}",
            tx.id, admin_id, tx.attempts, tx.user_id
        );

        if let Err(e) = self
            .notifier
            .notify(
                tx.user_id,
                &format!(
                    "✅ Payment confirmed! {} attempt(s) have been added to your balance.",
                    tx.attempts
                ),
            )
            .await
        {
            warn!("Failed to notify user {} about approval: {}", tx.user_id, e);
        }
        Ok(tx)
    }

    /// Resolve the transaction without ever touching the ledger.
    pub async fn decline(
        &self,
        transaction_id: i64,
        admin_id: i64,
    ) -> Result<Transaction, LedgerError> {
        if !self.is_admin(admin_id) {
            return Err(LedgerError::PermissionDenied(admin_id));
        }

        let tx = self
            .store
            .finalize_transaction(transaction_id, TransactionOutcome::Declined, admin_id)
            .await?;
        info!("Transaction {} declined by {}", tx.id, admin_id);

        if let Err(e) = self
            .notifier
            .notify(tx.user_id, "❌ Your payment was declined. Please try again.")
            .await
        {
            warn!("Failed to notify user {} about decline: {}", tx.user_id, e);
        }
        Ok(tx)
    }

    pub async fn pending_for(&self, user_id: i64) -> Result<Option<Transaction>, LedgerError> {
        self.store.pending_transaction(user_id).await
    }

    pub async fn history_for(&self, user_id: i64) -> Result<Vec<Transaction>, LedgerError> {
        self.store.transactions_for_user(user_id).await
    }

    /// Active transfer destinations shown to a purchaser.
    pub async fn payment_instructions(&self) -> Result<Vec<PaymentMethod>, LedgerError> {
        self.store.active_payment_methods().await
    }

    pub async fn add_method(
        &self,
        admin_id: i64,
        name: &str,
        details: &str,
    ) -> Result<bool, LedgerError> {
        if !self.is_admin(admin_id) {
            return Err(LedgerError::PermissionDenied(admin_id));
        }
        self.store.add_payment_method(name, details).await
    }

    pub async fn toggle_method(&self, admin_id: i64, method_id: i64) -> Result<(), LedgerError> {
        if !self.is_admin(admin_id) {
            return Err(LedgerError::PermissionDenied(admin_id));
        }
        self.store.toggle_payment_method(method_id).await
    }

    pub async fn delete_method(&self, admin_id: i64, method_id: i64) -> Result<(), LedgerError> {
        if !self.is_admin(admin_id) {
            return Err(LedgerError::PermissionDenied(admin_id));
        }
        self.store.delete_payment_method(method_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::test_support::RecordingNotifier;
    use fortuna_db::models::TransactionStatus;
    use fortuna_db::{LedgerLimits, MemoryLedgerStore};

    const ADMIN: i64 = 999;
    const USER: i64 = 7;

    fn service() -> (PaymentService, Arc<dyn LedgerStore>, Arc<RecordingNotifier>) {
        let store: Arc<dyn LedgerStore> =
            Arc::new(MemoryLedgerStore::new(LedgerLimits::default()));
        let notifier = Arc::new(RecordingNotifier::default());
        let service = PaymentService::new(store.clone(), notifier.clone(), vec![ADMIN]);
        (service, store, notifier)
    }

    #[tokio::test]
    async fn purchase_approval_end_to_end() {
        let (service, store, notifier) = service();

        let tx = service.request_attempts(USER, 1).await.unwrap();
        assert_eq!(tx.amount, 50);
        assert!(tx.is_pending());

        service.submit_receipt(USER, tx.id, "chat:42").await.unwrap();
        assert_eq!(notifier.reviews.lock().unwrap().as_slice(), &[(ADMIN, tx.id)]);

        let approved = service.approve(tx.id, ADMIN).await.unwrap();
        assert_eq!(approved.status, TransactionStatus::Completed);
        assert_eq!(approved.admin_id, Some(ADMIN));

        let balance = store.balance(USER).await.unwrap();
        assert_eq!((balance.paid, balance.used, balance.remaining()), (1, 0, 1));

        assert!(store.consume(USER, 1).await.unwrap());
        assert_eq!(store.balance(USER).await.unwrap().remaining(), 0);
        assert!(!store.consume(USER, 1).await.unwrap());

        // The user heard about the approval.
        let messages = notifier.messages.lock().unwrap();
        assert!(messages.iter().any(|(to, _)| *to == USER));
    }

    #[tokio::test]
    async fn unknown_tier_is_rejected_without_a_transaction() {
        let (service, store, _) = service();
        assert!(matches!(
            service.request_attempts(USER, 2).await,
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(store.transactions_for_user(USER).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_approvals_credit_exactly_once() {
        let (service, store, _) = service();
        let tx = service.request_attempts(USER, 5).await.unwrap();

        let service = Arc::new(service);
        let mut handles = Vec::new();
        for _ in 0..2 {
            let service = Arc::clone(&service);
            let id = tx.id;
            handles.push(tokio::spawn(
                async move { service.approve(id, ADMIN).await },
            ));
        }

        let mut ok = 0;
        let mut invalid_state = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::InvalidState { .. }) => invalid_state += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((ok, invalid_state), (1, 1));

        // Five attempts were bought; five were credited, once.
        assert_eq!(store.balance(USER).await.unwrap().paid, 5);
    }

    #[tokio::test]
    async fn decline_never_touches_the_ledger() {
        let (service, store, notifier) = service();
        let tx = service.request_attempts(USER, 3).await.unwrap();

        let declined = service.decline(tx.id, ADMIN).await.unwrap();
        assert_eq!(declined.status, TransactionStatus::Declined);
        assert_eq!(store.balance(USER).await.unwrap(), Default::default());

        // A declined transaction cannot later be approved.
        assert!(matches!(
            service.approve(tx.id, ADMIN).await,
            Err(LedgerError::InvalidState {
                status: TransactionStatus::Declined,
                ..
            })
        ));
        assert_eq!(store.balance(USER).await.unwrap().paid, 0);

        let messages = notifier.messages.lock().unwrap();
        assert!(messages.iter().any(|(to, text)| *to == USER && text.contains("declined")));
    }

    #[tokio::test]
    async fn non_admin_cannot_resolve_transactions() {
        let (service, store, _) = service();
        let tx = service.request_attempts(USER, 1).await.unwrap();

        assert!(matches!(
            service.approve(tx.id, USER).await,
            Err(LedgerError::PermissionDenied(USER))
        ));
        assert!(matches!(
            service.decline(tx.id, 12345).await,
            Err(LedgerError::PermissionDenied(12345))
        ));

        // The transaction is still pending and nothing was credited.
        let tx = store.transaction(tx.id).await.unwrap();
        assert!(tx.is_pending());
        assert_eq!(store.balance(USER).await.unwrap().paid, 0);
    }

    #[tokio::test]
    async fn receipts_require_an_open_transaction() {
        let (service, _, notifier) = service();

        assert!(matches!(
            service.submit_receipt(USER, 1, "chat:1").await,
            Err(LedgerError::NotFound(1))
        ));
        assert!(notifier.reviews.lock().unwrap().is_empty());

        let tx = service.request_attempts(USER, 1).await.unwrap();
        service.decline(tx.id, ADMIN).await.unwrap();
        assert!(matches!(
            service.submit_receipt(USER, tx.id, "chat:1").await,
            Err(LedgerError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn payment_methods_are_admin_gated() {
        let (service, _, _) = service();

        assert!(matches!(
            service.add_method(USER, "card", "1234").await,
            Err(LedgerError::PermissionDenied(USER))
        ));

        assert!(service.add_method(ADMIN, "card", "1234").await.unwrap());
        assert!(!service.add_method(ADMIN, "card", "5678").await.unwrap());
        let methods = service.payment_instructions().await.unwrap();
        assert_eq!(methods.len(), 1);

        service.toggle_method(ADMIN, methods[0].id).await.unwrap();
        assert!(service.payment_instructions().await.unwrap().is_empty());
    }
}
