use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::{info, warn};

use crate::bot::handlers::describe_error;
use crate::bot::keyboards::{main_menu, tiers_keyboard};
use crate::state::AppState;

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let user_id = match msg.from.as_ref() {
        Some(user) => user.id.0 as i64,
        None => return Ok(()),
    };

    // Any photo or document is treated as a payment receipt.
    if msg.photo().is_some() || msg.document().is_some() {
        return handle_receipt(bot, msg, state, user_id).await;
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };
    info!("Received message from {}: {:?}", user_id, text);

    if let Some(rest) = text.strip_prefix("/start") {
        let payload = rest.trim();
        if let Some(code) = payload.strip_prefix("ref") {
            match state.ledger.apply_referral(user_id, code).await {
                Ok(Some(_)) => {
                    let _ = bot
                        .send_message(
                            msg.chat.id,
                            "🎉 Referral bonus! You and your friend both received an extra attempt.",
                        )
                        .await;
                }
                Ok(None) => {}
                Err(e) => warn!("Referral for user {} failed: {}", user_id, e),
            }
        }
        if let Err(e) = state.ledger.ensure_referral_code(user_id).await {
            warn!("Failed to assign referral code to {}: {}", user_id, e);
        }

        let _ = bot
            .send_message(
                msg.chat.id,
                "🎡 Welcome to the Wheel of Fortune!\n\n\
                 Buy attempts, spin the wheel and win prizes. \
                 Attempts also come from the daily bonus and from inviting friends.",
            )
            .reply_markup(main_menu())
            .await;
        return Ok(());
    }

    if text.starts_with("/attempts") || text.starts_with("/balance") {
        match state.ledger.balance(user_id).await {
            Ok(balance) => {
                let _ = bot
                    .send_message(
                        msg.chat.id,
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
                let _ = bot.send_message(msg.chat.id, describe_error(&e)).await;
            }
        }
        return Ok(());
    }

    if text.starts_with("/history") {
        let reply = match state.payments.history_for(user_id).await {
            Ok(history) if history.is_empty() => "No purchases yet.".to_string(),
            Ok(history) => {
                let mut lines = vec!["🧾 Your purchases:".to_string()];
                for tx in history.iter().take(10) {
                    lines.push(format!(
                        "#{} — {} attempt(s) for {} [{}]",
                        tx.id, tx.attempts, tx.amount, tx.status
                    ));
                }
                lines.join("\n")
            }
            Err(e) => describe_error(&e),
        };
        let _ = bot.send_message(msg.chat.id, reply).await;
        return Ok(());
    }

    if text.starts_with("/prizes") {
        let reply = match state.wheel.unclaimed_prizes(user_id).await {
            Ok(prizes) if prizes.is_empty() => "No unclaimed prizes.".to_string(),
            Ok(prizes) => {
                let mut lines = vec!["🏆 Unclaimed prizes:".to_string()];
                for prize in &prizes {
                    lines.push(format!("#{} — {} ({})", prize.id, prize.value, prize.kind.as_str()));
                }
                lines.push("The administrator marks prizes as handed out.".to_string());
                lines.join("\n")
            }
            Err(e) => describe_error(&e),
        };
        let _ = bot.send_message(msg.chat.id, reply).await;
        return Ok(());
    }

    // Admin-only management of transfer destinations and prize handouts.
    if state.payments.is_admin(user_id) {
        if let Some(rest) = text.strip_prefix("/addmethod ") {
            let reply = match rest.split_once('|') {
                Some((name, details)) => {
                    match state
                        .payments
                        .add_method(user_id, name.trim(), details.trim())
                        .await
                    {
                        Ok(true) => "✅ Payment method added.".to_string(),
                        Ok(false) => "⚠️ A method with that name already exists.".to_string(),
                        Err(e) => describe_error(&e),
                    }
                }
                None => "Usage: /addmethod <name> | <details>".to_string(),
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
            return Ok(());
        }
        if let Some(raw_id) = text.strip_prefix("/togglemethod ") {
            let reply = match raw_id.trim().parse::<i64>() {
                Ok(id) => match state.payments.toggle_method(user_id, id).await {
                    Ok(()) => "✅ Payment method toggled.".to_string(),
                    Err(e) => describe_error(&e),
                },
                Err(_) => "Usage: /togglemethod <id>".to_string(),
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
            return Ok(());
        }
        if let Some(raw_id) = text.strip_prefix("/delmethod ") {
            let reply = match raw_id.trim().parse::<i64>() {
                Ok(id) => match state.payments.delete_method(user_id, id).await {
                    Ok(()) => "✅ Payment method removed.".to_string(),
                    Err(e) => describe_error(&e),
                },
                Err(_) => "Usage: /delmethod <id>".to_string(),
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
            return Ok(());
        }
        if let Some(raw_id) = text.strip_prefix("/handout ") {
            let reply = match raw_id.trim().parse::<i64>() {
                Ok(id) => match state.wheel.claim_prize(id).await {
                    Ok(()) => "✅ Prize marked as handed out.".to_string(),
                    Err(e) => describe_error(&e),
                },
                Err(_) => "Usage: /handout <prize id>".to_string(),
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
            return Ok(());
        }
    }

    let _ = bot
        .send_message(msg.chat.id, "Pick an option:")
        .reply_markup(main_menu())
        .await;
    Ok(())
}

/// Forward the receipt to the admins, record its opaque reference on the
/// user's open transaction, and let the workflow request the review.
async fn handle_receipt(
    bot: Bot,
    msg: Message,
    state: AppState,
    user_id: i64,
) -> Result<(), teloxide::RequestError> {
    let pending = match state.payments.pending_for(user_id).await {
        Ok(pending) => pending,
        Err(e) => {
            warn!("Failed to look up pending transaction for {}: {}", user_id, e);
            let _ = bot.send_message(msg.chat.id, describe_error(&e)).await;
            return Ok(());
        }
    };

    let Some(tx) = pending else {
        let _ = bot
            .send_message(
                msg.chat.id,
                "I have no open purchase for you. Pick a package first:",
            )
            .reply_markup(tiers_keyboard())
            .await;
        return Ok(());
    };

    for admin_id in state.payments.admin_ids() {
        if let Err(e) = bot
            .forward_message(ChatId(*admin_id), msg.chat.id, msg.id)
            .await
        {
            warn!("Failed to forward receipt to admin {}: {}", admin_id, e);
        }
    }

    // The core never inspects the file; it only keeps a reference.
    let receipt_reference = format!("{}:{}", msg.chat.id.0, msg.id.0);
    match state
        .payments
        .submit_receipt(user_id, tx.id, &receipt_reference)
        .await
    {
        Ok(tx) => {
            info!("Receipt {} recorded for transaction {}", receipt_reference, tx.id);
            let _ = bot
                .send_message(
                    msg.chat.id,
                    "🧾 Receipt sent for review. You will be notified once it is checked.",
                )
                .await;
        }
        Err(e) => {
            let _ = bot.send_message(msg.chat.id, describe_error(&e)).await;
        }
    }
    Ok(())
}
