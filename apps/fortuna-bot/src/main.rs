use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::prelude::*;

mod bot;
mod config;
mod notifier;
mod services;
mod state;
mod wheel;

use crate::config::BotConfig;
use crate::notifier::TelegramNotifier;
use crate::services::ledger_service::LedgerService;
use crate::services::payment_service::PaymentService;
use crate::services::wheel_service::WheelService;
use crate::state::AppState;
use crate::wheel::PrizeWheel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    log::info!("Starting Fortuna Bot...");

    let config = BotConfig::load()?;
    let store = fortuna_db::store::open(&config.store_config(), config.limits()).await?;

    let bot = Bot::new(config.bot_token.clone());
    let notifier = Arc::new(TelegramNotifier::new(bot.clone()));

    let ledger = LedgerService::new(
        store.clone(),
        config.daily_bonus_attempts,
        config.referral_bonus_attempts,
    );
    let payments = PaymentService::new(store.clone(), notifier, config.admin_ids.clone());
    let wheel = WheelService::new(store, Arc::new(PrizeWheel::standard()?));

    let state = AppState {
        ledger,
        payments,
        wheel,
    };

    // Shutdown hook for future signal handling; the dispatcher also stops
    // on its own when Telegram polling ends.
    let (_tx, rx) = tokio::sync::broadcast::channel(1);

    bot::run_bot(bot, rx, state).await;
    Ok(())
}
