//! Telegram Bot API adapter for the chat transport and payment provider.

mod api;
pub mod types;

pub use api::TelegramApi;
pub use types::Update;
