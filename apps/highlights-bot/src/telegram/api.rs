use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::types::{ApiResponse, SentMessage, WireReplyMarkup};
use crate::identity::UserId;
use crate::transport::{
    ChatTransport, InvoiceRequest, MessageId, OutboundMessage, ParseMode, PaymentProvider,
    PrecheckDecision, TransportError,
};

/// Bot API client. Implements both outbound collaborator contracts.
#[derive(Clone)]
pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramApi {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &impl Serialize,
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|error| TransportError::Transport(without_token(&error, &self.token)))?;
        decode(method, response).await
    }

    async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &str,
        form: Form,
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|error| TransportError::Transport(without_token(&error, &self.token)))?;
        decode(method, response).await
    }
}

async fn decode<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> Result<T, TransportError> {
    let status = response.status();
    let envelope: ApiResponse<T> = response
        .json()
        .await
        .map_err(|error| TransportError::Decode(format!("{method}: {error}")))?;
    if !envelope.ok {
        return Err(TransportError::Api {
            code: envelope
                .error_code
                .unwrap_or_else(|| i64::from(status.as_u16())),
            description: envelope
                .description
                .unwrap_or_else(|| format!("{method} failed")),
        });
    }
    envelope
        .result
        .ok_or_else(|| TransportError::Decode(format!("{method}: missing result")))
}

/// reqwest errors carry the request URL, which embeds the bot token.
fn without_token(error: &reqwest::Error, token: &str) -> String {
    error.to_string().replace(token, "<redacted>")
}

fn parse_mode_name(mode: ParseMode) -> &'static str {
    match mode {
        ParseMode::Markdown => "Markdown",
        ParseMode::MarkdownV2 => "MarkdownV2",
    }
}

fn message_body(chat_id: UserId, message: &OutboundMessage) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": message.text,
    });
    if let Some(mode) = message.parse_mode {
        body["parse_mode"] = json!(parse_mode_name(mode));
    }
    if let Some(markup) = &message.reply_markup {
        body["reply_markup"] = json!(WireReplyMarkup::from_markup(markup));
    }
    body
}

#[async_trait]
impl ChatTransport for TelegramApi {
    async fn send_message(
        &self,
        chat_id: UserId,
        message: OutboundMessage,
    ) -> Result<MessageId, TransportError> {
        let sent: SentMessage = self
            .call("sendMessage", &message_body(chat_id, &message))
            .await?;
        Ok(sent.message_id)
    }

    async fn send_photo(
        &self,
        chat_id: UserId,
        image: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageId, TransportError> {
        let part = Part::bytes(image)
            .file_name(file_name.to_string())
            .mime_str("image/png")
            .map_err(|error| TransportError::Transport(error.to_string()))?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);
        let sent: SentMessage = self.call_multipart("sendPhoto", form).await?;
        Ok(sent.message_id)
    }

    async fn edit_message_text(
        &self,
        chat_id: UserId,
        message_id: MessageId,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        let mut body = message_body(chat_id, &message);
        body["message_id"] = json!(message_id);
        // Returns the edited Message, or `true` for inline messages.
        let _: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for TelegramApi {
    async fn issue_invoice(&self, invoice: InvoiceRequest) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": invoice.chat_id,
            "title": invoice.title,
            "description": invoice.description,
            "payload": invoice.payload,
            "currency": invoice.currency,
            "prices": invoice.prices,
            "start_parameter": invoice.start_parameter,
        });
        let _: Value = self.call("sendInvoice", &body).await?;
        Ok(())
    }

    async fn answer_pre_checkout_query(
        &self,
        query_id: &str,
        decision: &PrecheckDecision,
    ) -> Result<(), TransportError> {
        let body = match decision {
            PrecheckDecision::Accept => json!({
                "pre_checkout_query_id": query_id,
                "ok": true,
            }),
            PrecheckDecision::Reject(reason) => json!({
                "pre_checkout_query_id": query_id,
                "ok": false,
                "error_message": reason,
            }),
        };
        let _: bool = self.call("answerPreCheckoutQuery", &body).await?;
        Ok(())
    }

    async fn reverse_charge(&self, user_id: UserId, charge_id: &str) -> Result<(), TransportError> {
        let body = json!({
            "user_id": user_id,
            "telegram_payment_charge_id": charge_id,
        });
        let _: bool = self.call("refundStarPayment", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::message_body;
    use crate::transport::{InlineKeyboard, OutboundMessage};

    #[test]
    fn keyboard_rows_are_compacted_on_the_wire() {
        let keyboard = InlineKeyboard::default()
            .text("9 ⭐", "donate_9")
            .row()
            .row()
            .text("Custom Value", "donate_custom")
            .row();
        let body = message_body(5, &OutboundMessage::plain("pick").with_keyboard(keyboard));
        assert_eq!(
            body["reply_markup"],
            json!({
                "inline_keyboard": [
                    [{ "text": "9 ⭐", "callback_data": "donate_9" }],
                    [{ "text": "Custom Value", "callback_data": "donate_custom" }],
                ]
            })
        );
        assert!(body.get("parse_mode").is_none());
    }

    #[test]
    fn force_reply_and_parse_mode_serialize() {
        let body = message_body(5, &OutboundMessage::markdown_v2("x").force_reply());
        assert_eq!(body["reply_markup"], json!({ "force_reply": true }));
        assert_eq!(body["parse_mode"], "MarkdownV2");
        assert_eq!(body["chat_id"], 5);
    }
}
