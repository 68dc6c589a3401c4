//! Bot API wire types. Only the fields the bot reads are modelled.

use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::transport::{InlineButton, MessageId, ReplyMarkup};

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
    #[serde(default)]
    pub pre_checkout_query: Option<PreCheckoutQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
    #[serde(default)]
    pub successful_payment: Option<SuccessfulPayment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    pub invoice_payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessfulPayment {
    pub invoice_payload: String,
    pub telegram_payment_charge_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub message_id: MessageId,
}

/// `reply_markup` as the Bot API expects it.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WireReplyMarkup<'a> {
    Inline {
        inline_keyboard: Vec<&'a [InlineButton]>,
    },
    ForceReply {
        force_reply: bool,
    },
}

impl<'a> WireReplyMarkup<'a> {
    /// Empty keyboard rows are dropped; the Bot API rejects them.
    pub fn from_markup(markup: &'a ReplyMarkup) -> Self {
        match markup {
            ReplyMarkup::Inline(keyboard) => Self::Inline {
                inline_keyboard: keyboard
                    .inline_keyboard
                    .iter()
                    .filter(|row| !row.is_empty())
                    .map(Vec::as_slice)
                    .collect(),
            },
            ReplyMarkup::ForceReply => Self::ForceReply { force_reply: true },
        }
    }
}
