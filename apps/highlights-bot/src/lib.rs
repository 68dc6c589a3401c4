#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    bot::BotService,
    config::Config,
    db::BotDb,
    donations::{ConversationTracker, DonationLedger, PaymentController, PaymentPolicy},
    highlight::{
        HighlightRenderer, HighlightService, HttpRenderer, ResvgRenderer, ScriptClassifier,
        render::load_lora_fonts,
    },
    identity::IdentityStore,
    kv::KvStore,
    server::{AppState, build_router},
    telegram::TelegramApi,
    transport::{ChatTransport, PaymentProvider},
};

pub mod bot;
pub mod config;
pub mod db;
pub mod donations;
pub mod error;
pub mod highlight;
pub mod identity;
pub mod kv;
pub mod server;
pub mod telegram;
pub mod transport;

#[cfg(test)]
mod testing;

pub async fn build_state(config: Config) -> Result<AppState> {
    let store: Arc<dyn KvStore> = match config.db_url.as_deref() {
        Some(url) => kv::postgres(Arc::new(BotDb::connect(url).await?)),
        None => {
            warn!("no DATABASE_URL configured, using in-memory store");
            kv::memory()
        }
    };

    let timeout = Duration::from_millis(config.telegram_timeout_ms);
    let telegram = Arc::new(
        TelegramApi::new(
            config.telegram_api_base_url.as_str(),
            config.bot_token.as_str(),
            timeout,
        )
        .context("failed to build Telegram client")?,
    );
    let chat: Arc<dyn ChatTransport> = telegram.clone();
    let provider: Arc<dyn PaymentProvider> = telegram;

    let identity = IdentityStore::new(store.clone());
    let payments = PaymentController::new(
        DonationLedger::new(store.clone()),
        ConversationTracker::new(store),
        chat.clone(),
        provider,
        PaymentPolicy {
            owner_id: config.owner_id,
            max_donation_stars: config.max_donation_stars,
            support_handle: config.support_contact.clone(),
        },
    );
    let bot = BotService::new(identity.clone(), payments, chat.clone());

    let (renderer, fonts): (Arc<dyn HighlightRenderer>, _) = match config.render_url.as_deref() {
        Some(url) => {
            let fonts = load_lora_fonts(&config.font_dir)
                .await
                .context("failed to load highlight fonts")?;
            let renderer =
                HttpRenderer::new(url, timeout).context("failed to build renderer client")?;
            (Arc::new(renderer), fonts)
        }
        None => match load_lora_fonts(&config.font_dir).await {
            Ok(fonts) => (Arc::new(ResvgRenderer::new(&fonts)), fonts),
            Err(error) => {
                warn!(reason = %error, "Lora fonts unavailable, rendering with system fonts");
                (Arc::new(ResvgRenderer::with_system_fonts()), Vec::new())
            }
        },
    };
    let highlights = HighlightService::new(
        identity,
        chat,
        Some(renderer),
        Arc::new(ScriptClassifier),
        config.layout,
        fonts,
    );

    Ok(AppState::new(bot, highlights, &config.bot_secret))
}

pub async fn build_app(config: Config) -> Result<axum::Router> {
    Ok(build_router(build_state(config).await?))
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        bind_addr = %config.bind_addr,
        owner_configured = config.owner_id.is_some(),
        persistent_store = config.db_url.is_some(),
        "highlights bot listening"
    );
    axum::serve(listener, build_app(config).await?).await?;
    Ok(())
}
