use teloxide::prelude::*;
use tracing::{info, warn};

use fortuna_db::LedgerError;

use crate::bot::handlers::describe_error;
use crate::bot::keyboards::{main_menu, tiers_keyboard};
use crate::state::AppState;

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    info!("Received callback: {:?}", q.data);
    let callback_id = q.id.clone();
    let user_id = q.from.id.0 as i64;
    let chat_id = q.message.as_ref().map(|m| m.chat().id);

    let Some(data) = q.data else {
        let _ = bot.answer_callback_query(callback_id).await;
        return Ok(());
    };

    match data.as_str() {
        "attempts" => {
            let _ = bot.answer_callback_query(callback_id).await;
            if let Some(chat) = chat_id {
                match state.ledger.balance(user_id).await {
                    Ok(balance) => {
                        let _ = bot
                            .send_message(
                                chat,
                                format!(
                                    "📊 Attempts — paid: {}, used: {}, remaining: {}",
                                    balance.paid,
                                    balance.used,
                                    balance.remaining()
                                ),
                            )
                            .reply_markup(main_menu())
                            .await;
                    }
                    Err(e) => {
                        let _ = bot.send_message(chat, describe_error(&e)).await;
                    }
                }
            }
        }

        "buy" => {
            let _ = bot.answer_callback_query(callback_id).await;
            if let Some(chat) = chat_id {
                let _ = bot
                    .send_message(chat, "Choose a package:")
                    .reply_markup(tiers_keyboard())
                    .await;
            }
        }

        "spin" => match state.wheel.spin(user_id).await {
            Ok(outcome) => {
                let _ = bot.answer_callback_query(callback_id).await;
                if let Some(chat) = chat_id {
                    let mut text = format!(
                        "🎡 The wheel stops at {}\n🏆 You won: {}!",
                        outcome.prize.segment, outcome.prize.title
                    );
                    if outcome.bonus_attempts > 0 {
                        text.push_str(&format!(
                            "\n➕ {} bonus attempt(s) credited.",
                            outcome.bonus_attempts
                        ));
                    }
                    text.push_str(&format!("\n🔄 Attempts remaining: {}", outcome.remaining));
                    let _ = bot.send_message(chat, text).reply_markup(main_menu()).await;
                }
            }
            Err(LedgerError::InsufficientAttempts) => {
                let _ = bot
                    .answer_callback_query(callback_id)
                    .text("❌ You have no attempts left!")
                    .show_alert(true)
                    .await;
            }
            Err(e) => {
                warn!("Spin failed for {}: {}", user_id, e);
                let _ = bot
                    .answer_callback_query(callback_id)
                    .text(describe_error(&e))
                    .show_alert(true)
                    .await;
            }
        },

        "bonus" => match state.ledger.claim_daily_bonus(user_id).await {
            Ok(true) => {
                let _ = bot.answer_callback_query(callback_id).await;
                if let Some(chat) = chat_id {
                    let _ = bot
                        .send_message(
                            chat,
                            format!(
                                "🎁 Daily bonus credited: +{} attempt(s)!",
                                state.ledger.daily_bonus_attempts()
                            ),
                        )
                        .reply_markup(main_menu())
                        .await;
                }
            }
            Ok(false) => {
                let _ = bot
                    .answer_callback_query(callback_id)
                    .text("You already took today's bonus. Come back tomorrow!")
                    .show_alert(true)
                    .await;
            }
            Err(e) => {
                let _ = bot
                    .answer_callback_query(callback_id)
                    .text(describe_error(&e))
                    .show_alert(true)
                    .await;
            }
        },

        "referral" => {
            let _ = bot.answer_callback_query(callback_id).await;
            if let Some(chat) = chat_id {
                let code = state.ledger.ensure_referral_code(user_id).await;
                let summary = state.ledger.referral_summary(user_id).await;
                match (code, summary) {
                    (Ok(code), Ok(summary)) => {
                        let _ = bot
                            .send_message(
                                chat,
                                format!(
                                    "👥 Invite friends and you both get an extra attempt.\n\
                                     Your code: ref{}\nFriends invited: {}",
                                    code, summary.referrals_count
                                ),
                            )
                            .await;
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        let _ = bot.send_message(chat, describe_error(&e)).await;
                    }
                }
            }
        }

        tier if tier.starts_with("buy_") => {
            let attempts = tier.trim_start_matches("buy_").parse::<i64>().unwrap_or(0);
            match state.payments.request_attempts(user_id, attempts).await {
                Ok(tx) => {
                    let _ = bot.answer_callback_query(callback_id).await;
                    if let Some(chat) = chat_id {
                        let methods = state
                            .payments
                            .payment_instructions()
                            .await
                            .unwrap_or_default();
                        let mut text = format!(
                            "You picked {} attempt(s) for {}.\n\nTransfer the amount to:\n",
                            tx.attempts, tx.amount
                        );
                        if methods.is_empty() {
                            text.push_str("(ask the administrator for payment details)\n");
                        }
                        for method in &methods {
                            text.push_str(&format!("• {}: {}\n", method.name, method.details));
                        }
                        text.push_str("\nThen send me the receipt as a photo or document.");
                        let _ = bot.send_message(chat, text).await;
                    }
                }
                Err(e) => {
                    let _ = bot
                        .answer_callback_query(callback_id)
                        .text(describe_error(&e))
                        .show_alert(true)
                        .await;
                }
            }
        }

        resolution if resolution.starts_with("approve:") || resolution.starts_with("decline:") => {
            let (action, raw_id) = resolution.split_once(':').unwrap_or(("", ""));
            let Ok(transaction_id) = raw_id.parse::<i64>() else {
                let _ = bot.answer_callback_query(callback_id).await;
                return Ok(());
            };

            let result = if action == "approve" {
                state.payments.approve(transaction_id, user_id).await
            } else {
                state.payments.decline(transaction_id, user_id).await
            };

            match result {
                Ok(_) => {
                    let confirmation = if action == "approve" {
                        "Payment confirmed."
                    } else {
                        "Payment declined."
                    };
                    let _ = bot
                        .answer_callback_query(callback_id)
                        .text(confirmation)
                        .await;
                }
                // Expected under admin double-taps; report instead of crediting twice.
                Err(e) => {
                    let _ = bot
                        .answer_callback_query(callback_id)
                        .text(describe_error(&e))
                        .show_alert(true)
                        .await;
                }
            }
        }

        _ => {
            let _ = bot.answer_callback_query(callback_id).await;
        }
    }

    Ok(())
}
