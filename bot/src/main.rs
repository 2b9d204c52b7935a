/// Gofer Relay Bot - Main Entry Point
///
/// Telegram bot that watches allowed chats for allowed URLs and relays
/// them through the Gofer fetch API, sending the result back as a video.
mod links;
mod relay;

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use gofer_shared::config::RelayConfig;
use relay::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // LOG_VERBOSE=0 quiets the relay down to warnings.
    let verbose = std::env::var("LOG_VERBOSE").map(|v| v != "0").unwrap_or(true);
    let default_filter = if verbose { "gofer_bot=info,gofer_shared=info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    info!("=== Gofer Relay Bot Starting ===");

    let config = RelayConfig::from_env()?;
    if config.allowed_chat_ids.is_empty() {
        warn!("ALLOWED_GROUP_IDS is empty; the bot will refuse every chat");
    }
    if config.allowed_url_prefixes.is_empty() {
        warn!("ALLOWED_URL_WHITELIST is empty; no URL will be relayed");
    }

    tokio::fs::create_dir_all(&config.staging_dir).await?;

    let mut bot = Bot::new(&config.bot_token);
    if let Some(api_url) = &config.telegram_api_url {
        bot = bot.set_api_url(api_url.parse()?);
    }

    // Explicitly delete any existing webhook before polling
    // (prevents 409 Conflict if a webhook was previously set)
    match bot.delete_webhook().send().await {
        Ok(_) => info!("Webhook cleared (ready for polling)"),
        Err(e) => warn!("Failed to delete webhook: {} (continuing anyway)", e),
    }

    let state = Arc::new(AppState {
        config,
        http: reqwest::Client::new(),
    });

    info!("Bot initialized, starting dispatcher...");

    let handler = Update::filter_message().endpoint({
        let state = state.clone();
        move |bot: Bot, msg: Message| {
            let state = state.clone();
            async move { relay::handle_message(bot, msg, state).await }
        }
    });

    Dispatcher::builder(bot, handler)
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.kind);
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Gofer Relay Bot stopped.");
    Ok(())
}
