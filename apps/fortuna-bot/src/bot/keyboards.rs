use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::services::payment_service::PURCHASE_TIERS;

pub fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("🎡 Spin the wheel", "spin")],
        vec![
            InlineKeyboardButton::callback("💰 Buy attempts", "buy"),
            InlineKeyboardButton::callback("ℹ️ My attempts", "attempts"),
        ],
        vec![
            InlineKeyboardButton::callback("🎁 Daily bonus", "bonus"),
            InlineKeyboardButton::callback("👥 Referral", "referral"),
        ],
    ])
}

pub fn tiers_keyboard() -> InlineKeyboardMarkup {
    let rows = PURCHASE_TIERS
        .iter()
        .map(|tier| {
            vec![InlineKeyboardButton::callback(
                format!("{} attempt(s) — {}", tier.attempts, tier.price),
                format!("buy_{}", tier.attempts),
            )]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

/// Approve/decline controls bound to one transaction, sent to admins.
pub fn review_keyboard(transaction_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Approve", format!("approve:{transaction_id}")),
        InlineKeyboardButton::callback("❌ Decline", format!("decline:{transaction_id}")),
    ]])
}
