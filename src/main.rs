//! helpdesk-bot — Telegram-бот техподдержки: заявки, принятие, закрытие.

mod anchor;
mod assignment;
mod bot;
mod config;
mod db;
mod gateway;
mod ledger;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::Dispatcher;
use teloxide::prelude::*;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/helpdesk-bot.toml"));
    tracing::info!(
        "Starting helpdesk-bot with config {}",
        config_path.display()
    );

    let config = Arc::new(config::Config::load(&config_path)?);
    let token = config.bot_token()?;
    tracing::info!(
        admin_count = config.staff.admins.len(),
        boss = ?config.staff.boss_id,
        routing = ?config.routing.mode,
        db_path = %config.db_path.display(),
        "Configuration loaded"
    );

    let db = Arc::new(db::Db::open(&config.db_path).await?);

    let telegram_bot = Bot::new(token);
    let state = bot::handlers::BotState {
        config,
        db,
        gateway: Arc::new(gateway::TelegramGateway::new(telegram_bot.clone())),
        ledger: Arc::new(ledger::NotificationLedger::new()),
        anchors: Arc::new(anchor::AnchorScreens::new()),
        drafts: Arc::new(Mutex::new(std::collections::HashMap::new())),
    };
    tracing::info!("Dispatcher initialized, bot is ready");

    Dispatcher::builder(telegram_bot, bot::handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
