//! Outbound collaborator contracts: chat delivery and the payment provider.

use async_trait::async_trait;
use serde::Serialize;

use crate::identity::UserId;

pub type MessageId = i64;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_error",
            Self::Api { .. } => "api_error",
            Self::Decode(_) => "decode_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    Markdown,
    MarkdownV2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    #[must_use]
    pub fn text(mut self, text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        let button = InlineButton {
            text: text.into(),
            callback_data: callback_data.into(),
        };
        match self.inline_keyboard.last_mut() {
            Some(row) => row.push(button),
            None => self.inline_keyboard.push(vec![button]),
        }
        self
    }

    #[must_use]
    pub fn row(mut self) -> Self {
        self.inline_keyboard.push(Vec::new());
        self
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.inline_keyboard.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyMarkup {
    Inline(InlineKeyboard),
    ForceReply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    pub reply_markup: Option<ReplyMarkup>,
}

impl OutboundMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: None,
            reply_markup: None,
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: Some(ParseMode::Markdown),
            reply_markup: None,
        }
    }

    pub fn markdown_v2(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: Some(ParseMode::MarkdownV2),
            reply_markup: None,
        }
    }

    #[must_use]
    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.reply_markup = Some(ReplyMarkup::Inline(keyboard));
        self
    }

    #[must_use]
    pub fn force_reply(mut self) -> Self {
        self.reply_markup = Some(ReplyMarkup::ForceReply);
        self
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: UserId,
        message: OutboundMessage,
    ) -> Result<MessageId, TransportError>;

    async fn send_photo(
        &self,
        chat_id: UserId,
        image: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageId, TransportError>;

    async fn edit_message_text(
        &self,
        chat_id: UserId,
        message_id: MessageId,
        message: OutboundMessage,
    ) -> Result<(), TransportError>;

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledPrice {
    pub label: String,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    pub chat_id: UserId,
    pub title: String,
    pub description: String,
    pub payload: String,
    pub currency: String,
    pub prices: Vec<LabeledPrice>,
    pub start_parameter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecheckDecision {
    Accept,
    Reject(String),
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn issue_invoice(&self, invoice: InvoiceRequest) -> Result<(), TransportError>;

    async fn answer_pre_checkout_query(
        &self,
        query_id: &str,
        decision: &PrecheckDecision,
    ) -> Result<(), TransportError>;

    /// Reverses a captured charge. The provider refuses to reverse a charge
    /// twice, which backstops concurrent refund attempts.
    async fn reverse_charge(&self, user_id: UserId, charge_id: &str)
    -> Result<(), TransportError>;
}
