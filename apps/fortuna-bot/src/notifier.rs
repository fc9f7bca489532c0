use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;

use fortuna_db::models::Transaction;

use crate::bot::keyboards::review_keyboard;

/// Messaging-relay boundary. The workflow only ever calls this after its
/// store operation committed, so delivery problems can never corrupt the
/// ledger; they are logged and the state stands.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient_id: i64, message: &str) -> Result<()>;

    /// Ask an administrator to resolve a submitted receipt.
    async fn request_review(&self, admin_id: i64, tx: &Transaction) -> Result<()>;
}

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, recipient_id: i64, message: &str) -> Result<()> {
        self.bot.send_message(ChatId(recipient_id), message).await?;
        Ok(())
    }

    async fn request_review(&self, admin_id: i64, tx: &Transaction) -> Result<()> {
        let text = format!(
            "🧾 Receipt for transaction #{}\nUser: {}\nAmount: {}\nAttempts: {}",
            tx.id, tx.user_id, tx.amount, tx.attempts
        );
        self.bot
            .send_message(ChatId(admin_id), text)
            .reply_markup(review_keyboard(tx.id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Records everything the workflow tried to send.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub messages: Mutex<Vec<(i64, String)>>,
        pub reviews: Mutex<Vec<(i64, i64)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, recipient_id: i64, message: &str) -> Result<()> {
            self.messages
                .lock()
                .unwrap()
                .push((recipient_id, message.to_string()));
            Ok(())
        }

        async fn request_review(&self, admin_id: i64, tx: &Transaction) -> Result<()> {
            self.reviews.lock().unwrap().push((admin_id, tx.id));
            Ok(())
        }
    }
}
