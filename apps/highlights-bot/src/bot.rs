//! Inbound update dispatch: commands, callback buttons, free-text replies and
//! payment events.

use std::sync::Arc;

use crate::donations::service::{
    DONATE_CALLBACK_PREFIX, DONATE_CUSTOM_ACTION, REFUND_CALLBACK_PREFIX, parse_refund_callback,
};
use crate::donations::{CustomAmountOutcome, PaymentController};
use crate::error::BotError;
use crate::identity::{IdentityStore, Theme, UserId};
use crate::telegram::types::{CallbackQuery, Message, PreCheckoutQuery, Update};
use crate::transport::{ChatTransport, InlineKeyboard, OutboundMessage};

const CHANGE_THEME_PREFIX: &str = "changetheme_";
const PLUGIN_DOWNLOAD_URL: &str =
    "https://github.com/0xmiki/telegramhighlights.koplugin/archive/refs/heads/main.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    NewKey,
    Key,
    ChangeTheme,
    Help,
    Donate,
    Donations,
    Refund,
}

impl Command {
    /// Parses `/name` or `/name@botname`, ignoring trailing arguments.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?.strip_prefix('/')?;
        let name = word.split('@').next()?;
        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "newkey" => Some(Self::NewKey),
            "key" => Some(Self::Key),
            "changetheme" => Some(Self::ChangeTheme),
            "help" => Some(Self::Help),
            "donate" => Some(Self::Donate),
            "donations" => Some(Self::Donations),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct BotService {
    identity: IdentityStore,
    payments: PaymentController,
    chat: Arc<dyn ChatTransport>,
}

impl BotService {
    pub fn new(
        identity: IdentityStore,
        payments: PaymentController,
        chat: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            identity,
            payments,
            chat,
        }
    }

    /// Handles one update. Failures are logged and, where a user is known,
    /// answered with a generic notice; the update is never re-delivered.
    pub async fn handle_update(&self, update: Update) {
        let update_id = update.update_id;
        let (user_id, result) = if let Some(query) = update.pre_checkout_query {
            (Some(query.from.id), self.on_pre_checkout(query).await)
        } else if let Some(callback) = update.callback_query {
            (Some(callback.from.id), self.on_callback(callback).await)
        } else if let Some(message) = update.message {
            let user_id = message.from.as_ref().map(|user| user.id);
            (user_id, self.on_message(message).await)
        } else {
            tracing::debug!(update_id, "ignoring update without handled payload");
            return;
        };

        if let Err(error) = result {
            tracing::error!(
                update_id,
                user_id = ?user_id,
                code = error.code(),
                reason = %error,
                "update handling failed"
            );
            if let Some(user_id) = user_id {
                let notice = OutboundMessage::plain(format!(
                    "Sorry, something went wrong. Please try again later or contact {}.",
                    self.support_handle()
                ));
                if let Err(error) = self.chat.send_message(user_id, notice).await {
                    tracing::warn!(user_id, reason = %error, "failure notice not delivered");
                }
            }
        }
    }

    async fn on_pre_checkout(&self, query: PreCheckoutQuery) -> Result<(), BotError> {
        self.payments
            .pre_checkout(&query.id, query.from.id, &query.invoice_payload)
            .await?;
        Ok(())
    }

    async fn on_message(&self, message: Message) -> Result<(), BotError> {
        let Some(user_id) = message.from.as_ref().map(|user| user.id) else {
            return Ok(());
        };

        if let Some(payment) = &message.successful_payment {
            // The controller already told the payer about any failure.
            if let Err(error) = self
                .payments
                .capture(
                    user_id,
                    &payment.invoice_payload,
                    &payment.telegram_payment_charge_id,
                )
                .await
            {
                tracing::error!(user_id, code = error.code(), reason = %error, "capture failed");
            }
            return Ok(());
        }

        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        if let Some(command) = Command::parse(text) {
            return self.on_command(user_id, command).await;
        }

        let reply_to = message.reply_to_message.as_ref().map(|reply| reply.message_id);
        match self
            .payments
            .handle_custom_amount_reply(user_id, reply_to, text)
            .await?
        {
            CustomAmountOutcome::Ignored => {
                tracing::debug!(user_id, "free text outside a donation prompt");
            }
            CustomAmountOutcome::Reprompted
            | CustomAmountOutcome::Invoiced(_)
            | CustomAmountOutcome::InvoiceFailed => {}
        }
        Ok(())
    }

    async fn on_command(&self, user_id: UserId, command: Command) -> Result<(), BotError> {
        let reply = match command {
            Command::Start => {
                let (record, _) = self.identity.ensure_record(user_id).await?;
                OutboundMessage::markdown(welcome_text(&record.key))
            }
            Command::NewKey => {
                let record = self.identity.rotate_key(user_id).await?;
                OutboundMessage::markdown(format!("Your new key is:\n`{}`", record.key))
            }
            Command::Key => match self.identity.get_record(user_id).await? {
                Some(record) => {
                    OutboundMessage::markdown(format!("Your current key is:\n`{}`", record.key))
                }
                None => OutboundMessage::plain("No key found. Use /newkey to generate one."),
            },
            Command::ChangeTheme => match self.identity.get_record(user_id).await? {
                Some(record) => {
                    let theme = record.theme.toggled();
                    self.identity.set_theme(user_id, theme).await?;
                    OutboundMessage::markdown(format!("Theme changed to *{}* mode.", theme.as_str()))
                        .with_keyboard(theme_keyboard(theme))
                }
                None => OutboundMessage::plain("No user record. Use /start first."),
            },
            Command::Help => {
                let record = self.identity.get_record(user_id).await?;
                let key = record.map_or_else(|| "(none)".to_string(), |record| record.key);
                OutboundMessage::markdown(help_text(&key, self.support_handle()))
            }
            Command::Donate => self.payments.donate_menu(),
            Command::Donations => self.payments.donation_history(user_id).await?,
            Command::Refund => self.payments.refund_options(user_id).await?,
        };
        self.chat.send_message(user_id, reply).await?;
        Ok(())
    }

    async fn on_callback(&self, callback: CallbackQuery) -> Result<(), BotError> {
        let user_id = callback.from.id;
        let data = callback.data.as_deref().unwrap_or_default();

        if let Some(theme) = data.strip_prefix(CHANGE_THEME_PREFIX) {
            return self.on_theme_callback(&callback, theme).await;
        }
        if let Some(action) = data.strip_prefix(DONATE_CALLBACK_PREFIX) {
            return self.on_donate_callback(&callback.id, user_id, action).await;
        }
        if data.starts_with(REFUND_CALLBACK_PREFIX) {
            return self.on_refund_callback(&callback.id, user_id, data).await;
        }

        tracing::debug!(user_id, data, "unrecognized callback data");
        self.answer(&callback.id, Some("Unknown action.")).await
    }

    async fn on_theme_callback(&self, callback: &CallbackQuery, raw: &str) -> Result<(), BotError> {
        let user_id = callback.from.id;
        let Some(theme) = Theme::parse(raw) else {
            return self.answer(&callback.id, Some("Unknown theme.")).await;
        };
        if self.identity.set_theme(user_id, theme).await?.is_none() {
            return self.answer(&callback.id, Some("No user record found.")).await;
        }

        let message = OutboundMessage::markdown(format!("Theme switched to *{}* mode.", theme.as_str()))
            .with_keyboard(theme_keyboard(theme));
        match &callback.message {
            Some(original) => {
                self.chat
                    .edit_message_text(original.chat.id, original.message_id, message)
                    .await?;
            }
            None => {
                self.chat.send_message(user_id, message).await?;
            }
        }
        let notice = format!("Switched to {} mode!", theme.as_str());
        self.answer(&callback.id, Some(&notice)).await
    }

    async fn on_donate_callback(
        &self,
        callback_id: &str,
        user_id: UserId,
        action: &str,
    ) -> Result<(), BotError> {
        if action == DONATE_CUSTOM_ACTION {
            self.payments.prompt_custom_amount(user_id).await?;
            return self.answer(callback_id, None).await;
        }

        let Some(stars) = action.parse::<u32>().ok().filter(|stars| *stars > 0) else {
            return self.answer(callback_id, Some("Invalid donation amount.")).await;
        };
        match self.payments.issue_invoice(user_id, stars).await {
            Ok(_) => self.answer(callback_id, None).await,
            Err(BotError::InvalidInput(_)) => {
                self.answer(callback_id, Some("Invalid donation amount.")).await
            }
            Err(error) => {
                tracing::error!(user_id, stars, reason = %error, "sending invoice failed");
                self.answer(callback_id, Some("Error creating invoice.")).await
            }
        }
    }

    async fn on_refund_callback(
        &self,
        callback_id: &str,
        requester: UserId,
        data: &str,
    ) -> Result<(), BotError> {
        let Some((target_user_id, timestamp)) = parse_refund_callback(data) else {
            return self.answer(callback_id, Some("Invalid refund request.")).await;
        };

        match self
            .payments
            .execute_refund(requester, target_user_id, timestamp)
            .await
        {
            Ok(_) => self.answer(callback_id, Some("Refund processed successfully!")).await,
            Err(BotError::Unauthorized(message)) => self.answer(callback_id, Some(&message)).await,
            Err(BotError::NotFound(_) | BotError::AlreadyRefunded) => {
                self.answer(callback_id, Some("Donation not found or already refunded."))
                    .await
            }
            Err(error) => {
                tracing::error!(
                    requester,
                    target_user_id,
                    timestamp,
                    code = error.code(),
                    reason = %error,
                    "refund failed"
                );
                let support = self.support_handle();
                self.answer(
                    callback_id,
                    Some(&format!("Failed to process refund. Please contact {support}.")),
                )
                .await?;
                self.chat
                    .send_message(
                        requester,
                        OutboundMessage::plain(format!(
                            "There was an error processing your refund. Please contact {support}."
                        )),
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn answer(&self, callback_id: &str, text: Option<&str>) -> Result<(), BotError> {
        self.chat.answer_callback_query(callback_id, text).await?;
        Ok(())
    }

    fn support_handle(&self) -> &str {
        &self.payments.policy().support_handle
    }
}

fn theme_keyboard(current: Theme) -> InlineKeyboard {
    let next = current.toggled();
    InlineKeyboard::default().text(
        format!("Switch to {} mode", next.as_str()),
        format!("{CHANGE_THEME_PREFIX}{}", next.as_str()),
    )
}

fn welcome_text(key: &str) -> String {
    format!(
        "Welcome! Your verification key is:\n\n`{key}`\n\n\
         /newkey get a new key\n\
         /key view your current key\n\
         /changetheme change the image style\n\
         /help full list of commands\n\
         /donate Donate stars 🤗✨🫶🏻😗\n"
    )
}

fn help_text(key: &str, support: &str) -> String {
    format!(
        "*How to use this bot:*\n\n\
         1. Install the KOReader Telegram plugin. [Download Zip]({PLUGIN_DOWNLOAD_URL})\n\
         2. Go into the extracted folder\n\
         3. Grab the telegramhighlights.koplugin folder and place it in the KOReader plugin directory\n\
         4. Then Go to koreader -> menu -> 🛠️ -> Last page -> Telegram Highlights -> Set Verification Code -> enter your verification key: `{key}`\n\
         5. Thats it\n\n\
         *Available commands:*\n\n\
         /newkey - Generate a new key\n\
         /key - Show your current key\n\
         /changetheme - Change image style\n\
         /help - Show this help message\n\
         /donate - Donate stars 🤗✨🫶🏻😗\n\
         /refund - If you change your mind 🥹❤️‍🩹\n\
         /donations - List donations\n\n\
         for any further questions you can hmu {support}\n"
    )
}
