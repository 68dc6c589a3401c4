use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::donations::conversation::ConversationTracker;
use crate::donations::ledger::DonationLedger;
use crate::donations::types::{
    CapturedPayment, DONATION_CURRENCY, DONATION_START_PARAMETER, DonationRecord, IssuedInvoice,
    PRESET_DONATION_AMOUNTS, PayloadError, PrecheckedPayment,
};
use crate::error::BotError;
use crate::identity::UserId;
use crate::transport::{
    ChatTransport, InlineKeyboard, InvoiceRequest, LabeledPrice, MessageId, OutboundMessage,
    PaymentProvider, PrecheckDecision,
};

pub const DONATE_CALLBACK_PREFIX: &str = "donate_";
pub const DONATE_CUSTOM_ACTION: &str = "custom";
pub const REFUND_CALLBACK_PREFIX: &str = "refund_";

const CUSTOM_AMOUNT_PROMPT: &str =
    "Please enter the number of Stars you want to donate (e.g., 50).";
const CUSTOM_AMOUNT_INVALID: &str = "Please enter a valid number of Stars (e.g., 50).";

#[derive(Debug, Clone)]
pub struct PaymentPolicy {
    pub owner_id: Option<UserId>,
    pub max_donation_stars: u32,
    pub support_handle: String,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            owner_id: None,
            max_donation_stars: 10_000,
            support_handle: "@mikxyas".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomAmountOutcome {
    /// Message was not a reply to the active prompt.
    Ignored,
    /// Amount was rejected and a fresh prompt registered.
    Reprompted,
    Invoiced(IssuedInvoice),
    /// Amount was valid but the provider refused the invoice.
    InvoiceFailed,
}

/// Drives a donation from invoice to capture, and captured donations to refund.
#[derive(Clone)]
pub struct PaymentController {
    ledger: DonationLedger,
    conversation: ConversationTracker,
    chat: Arc<dyn ChatTransport>,
    payments: Arc<dyn PaymentProvider>,
    policy: PaymentPolicy,
}

impl PaymentController {
    pub fn new(
        ledger: DonationLedger,
        conversation: ConversationTracker,
        chat: Arc<dyn ChatTransport>,
        payments: Arc<dyn PaymentProvider>,
        policy: PaymentPolicy,
    ) -> Self {
        Self {
            ledger,
            conversation,
            chat,
            payments,
            policy,
        }
    }

    pub fn ledger(&self) -> &DonationLedger {
        &self.ledger
    }

    pub fn policy(&self) -> &PaymentPolicy {
        &self.policy
    }

    pub fn donate_menu(&self) -> OutboundMessage {
        let mut keyboard = InlineKeyboard::default();
        for (index, amount) in PRESET_DONATION_AMOUNTS.iter().enumerate() {
            if index > 0 && index % 2 == 0 {
                keyboard = keyboard.row();
            }
            keyboard = keyboard.text(
                format!("{amount} ⭐"),
                format!("{DONATE_CALLBACK_PREFIX}{amount}"),
            );
        }
        keyboard = keyboard.text(
            "Custom Value",
            format!("{DONATE_CALLBACK_PREFIX}{DONATE_CUSTOM_ACTION}"),
        );
        OutboundMessage::plain(
            "Support the bot with a donation! Choose an amount or select Custom Value to enter your own.",
        )
        .with_keyboard(keyboard)
    }

    /// `NONE -> INVOICED`. Asks the provider to present an invoice; nothing is stored.
    pub async fn issue_invoice(&self, user_id: UserId, stars: u32) -> Result<IssuedInvoice, BotError> {
        self.validate_amount(stars)?;
        let invoice = IssuedInvoice::new(user_id, stars, Utc::now().timestamp_millis())
            .ok_or_else(|| BotError::InvalidInput("stars must be > 0".to_string()))?;
        self.payments
            .issue_invoice(InvoiceRequest {
                chat_id: user_id,
                title: "Donation to the Bot".to_string(),
                description: format!(
                    "Thank you for supporting the bot with {stars} Stars! 🤗✨🫶🏻😗"
                ),
                payload: invoice.payload().to_string(),
                currency: DONATION_CURRENCY.to_string(),
                prices: vec![LabeledPrice {
                    label: "Donation".to_string(),
                    amount: stars,
                }],
                start_parameter: DONATION_START_PARAMETER.to_string(),
            })
            .await?;
        tracing::info!(user_id, stars, "donation invoice issued");
        Ok(invoice)
    }

    /// Sends the force-reply prompt and makes it the only prompt whose reply
    /// is read as an amount.
    pub async fn prompt_custom_amount(&self, user_id: UserId) -> Result<MessageId, BotError> {
        self.send_prompt(user_id, CUSTOM_AMOUNT_PROMPT).await
    }

    pub async fn handle_custom_amount_reply(
        &self,
        user_id: UserId,
        reply_to: Option<MessageId>,
        text: &str,
    ) -> Result<CustomAmountOutcome, BotError> {
        if !self.conversation.consume_if_matches(user_id, reply_to).await? {
            return Ok(CustomAmountOutcome::Ignored);
        }

        let stars = match parse_star_amount(text) {
            Some(stars) if self.validate_amount(stars).is_ok() => stars,
            _ => {
                let prompt = if text.trim().parse::<u64>().is_ok_and(|value| value > 0) {
                    format!(
                        "The maximum donation is {} Stars. Please enter a smaller amount.",
                        self.policy.max_donation_stars
                    )
                } else {
                    CUSTOM_AMOUNT_INVALID.to_string()
                };
                self.send_prompt(user_id, &prompt).await?;
                return Ok(CustomAmountOutcome::Reprompted);
            }
        };

        match self.issue_invoice(user_id, stars).await {
            Ok(invoice) => Ok(CustomAmountOutcome::Invoiced(invoice)),
            Err(BotError::Provider(error)) => {
                tracing::error!(user_id, stars, reason = %error, "sending invoice failed");
                self.notify(
                    user_id,
                    OutboundMessage::plain("Sorry, there was an error creating the donation invoice."),
                )
                .await;
                Ok(CustomAmountOutcome::InvoiceFailed)
            }
            Err(error) => Err(error),
        }
    }

    /// `INVOICED -> PRECHECKED`. Always answers the query: a rejection when the
    /// payload is foreign or names another user, and a rejection when the
    /// acceptance itself could not be delivered.
    pub async fn pre_checkout(
        &self,
        query_id: &str,
        payer: UserId,
        raw_payload: &str,
    ) -> Result<PrecheckDecision, BotError> {
        let decision = match PrecheckedPayment::validate(raw_payload, payer) {
            Ok(_) => PrecheckDecision::Accept,
            Err(rejection) => {
                tracing::warn!(payer, reason = rejection.message(), "pre-checkout rejected");
                PrecheckDecision::Reject(rejection.message().to_string())
            }
        };

        match self.payments.answer_pre_checkout_query(query_id, &decision).await {
            Ok(()) => Ok(decision),
            Err(error) if decision == PrecheckDecision::Accept => {
                tracing::error!(payer, reason = %error, "answering pre-checkout query failed");
                let fallback = PrecheckDecision::Reject("Internal error.".to_string());
                self.payments
                    .answer_pre_checkout_query(query_id, &fallback)
                    .await?;
                Ok(fallback)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// `PRECHECKED -> CAPTURED`. The only place a [`DonationRecord`] is created.
    /// Returns `Ok(None)` for payments that are not donations.
    pub async fn capture(
        &self,
        payer: UserId,
        raw_payload: &str,
        payment_charge_id: &str,
    ) -> Result<Option<DonationRecord>, BotError> {
        let payment = match CapturedPayment::from_successful_payment(
            raw_payload,
            payer,
            payment_charge_id.to_string(),
        ) {
            Ok(payment) => payment,
            Err(PayloadError::NotDonation) => return Ok(None),
            Err(error) => {
                tracing::error!(payer, charge_id = payment_charge_id, reason = %error, "captured payment has unreadable payload");
                self.notify(
                    payer,
                    OutboundMessage::plain(
                        "Payment received, but there was an error saving the donation. Please contact support.",
                    ),
                )
                .await;
                return Err(BotError::InvalidInput(error.to_string()));
            }
        };

        let stars = payment.stars;
        match self.ledger.record(payment).await {
            Ok(record) => {
                self.notify(
                    payer,
                    OutboundMessage::markdown(format!(
                        "Thank you for your generous donation of {stars} Stars! Your support keeps this bot running! 🌟"
                    )),
                )
                .await;
                Ok(Some(record))
            }
            Err(error) => {
                tracing::error!(payer, stars, charge_id = payment_charge_id, reason = %error, "payment captured but donation not recorded");
                self.notify(
                    payer,
                    OutboundMessage::plain(
                        "Payment received, but there was an error saving the donation. Please contact support.",
                    ),
                )
                .await;
                Err(error.into())
            }
        }
    }

    pub async fn donation_history(&self, user_id: UserId) -> Result<OutboundMessage, BotError> {
        let mut donations = self.ledger.list_for_user(user_id).await?;
        if donations.is_empty() {
            return Ok(OutboundMessage::markdown(
                "You haven't made any donations yet. Support the bot with `/donate`!",
            ));
        }
        donations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let lines = donations
            .iter()
            .map(|donation| {
                let status = if donation.refunded { " (Refunded)" } else { "" };
                format!(
                    "- {}: {} ⭐ (ID: {}...){status}",
                    format_datetime(donation.timestamp),
                    donation.stars,
                    donation.short_charge_id()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        // Plain text: charge ids may contain Markdown metacharacters.
        Ok(OutboundMessage::plain(format!(
            "Your donation history:\n\n{lines}\n\nThank you for supporting the bot! 🤗✨🫶🏻😗  Donate more with /donate or contact {} for support.",
            self.policy.support_handle
        )))
    }

    /// Refund selection: one button per non-refunded donation, newest first.
    pub async fn refund_options(&self, user_id: UserId) -> Result<OutboundMessage, BotError> {
        let mut donations: Vec<DonationRecord> = self
            .ledger
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|donation| !donation.refunded)
            .collect();
        if donations.is_empty() {
            return Ok(OutboundMessage::markdown(
                "You have no refundable donations. View your donation history with `/donations` or donate with `/donate`.",
            ));
        }
        donations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let mut keyboard = InlineKeyboard::default();
        for donation in &donations {
            keyboard = keyboard
                .text(
                    format!("{} ⭐ on {}", donation.stars, format_date(donation.timestamp)),
                    format!(
                        "{REFUND_CALLBACK_PREFIX}{}_{}",
                        donation.user_id, donation.timestamp
                    ),
                )
                .row();
        }
        Ok(OutboundMessage::plain("Select a donation to refund:").with_keyboard(keyboard))
    }

    /// `CAPTURED -> REFUNDED`.
    ///
    /// 1. requester must be the payer or the configured owner
    /// 2. the record must exist and not be refunded (last read before reversal)
    /// 3. the provider reverses the charge
    /// 4. only then is the ledger flipped
    /// 5. the payer is notified, and the owner too when the payer self-refunded
    ///
    /// A failure in step 4 means money moved without the ledger knowing; it is
    /// reported as [`BotError::Reconciliation`] and never retried here, because
    /// repeating step 3 is not safe.
    pub async fn execute_refund(
        &self,
        requester: UserId,
        target_user_id: UserId,
        timestamp: i64,
    ) -> Result<DonationRecord, BotError> {
        let is_owner = self.policy.owner_id == Some(requester);
        if requester != target_user_id && !is_owner {
            tracing::warn!(requester, target_user_id, timestamp, "unauthorized refund attempt");
            return Err(BotError::Unauthorized(
                "You are not authorized to refund this donation.".to_string(),
            ));
        }

        let donation = self
            .ledger
            .get(target_user_id, timestamp)
            .await?
            .ok_or_else(|| BotError::NotFound("donation not found".to_string()))?
            .into_refundable()
            .ok_or(BotError::AlreadyRefunded)?;

        let charge_id = donation.record().payment_charge_id.clone();
        self.payments
            .reverse_charge(target_user_id, &charge_id)
            .await?;

        let refunded = match self.ledger.mark_refunded(target_user_id, timestamp).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Err(self.reconciliation_error(
                    target_user_id,
                    timestamp,
                    &charge_id,
                    "donation record disappeared".to_string(),
                ));
            }
            Err(error) => {
                return Err(self.reconciliation_error(
                    target_user_id,
                    timestamp,
                    &charge_id,
                    error.to_string(),
                ));
            }
        };
        tracing::info!(
            requester,
            user_id = target_user_id,
            timestamp,
            stars = refunded.stars,
            "donation refunded"
        );

        let date = format_date(refunded.timestamp);
        self.notify(
            target_user_id,
            OutboundMessage::markdown(format!(
                "Successfully refunded {} ⭐ for donation on {date}.",
                refunded.stars
            )),
        )
        .await;
        if let Some(owner_id) = self.policy.owner_id {
            if requester == target_user_id && owner_id != target_user_id {
                self.notify(
                    owner_id,
                    OutboundMessage::plain(format!(
                        "User {target_user_id} refunded {} ⭐ for donation on {date} (ID: {}...).",
                        refunded.stars,
                        refunded.short_charge_id()
                    )),
                )
                .await;
            }
        }

        Ok(refunded)
    }

    fn reconciliation_error(
        &self,
        user_id: UserId,
        timestamp: i64,
        charge_id: &str,
        reason: String,
    ) -> BotError {
        tracing::error!(
            user_id,
            timestamp,
            charge_id,
            reason = %reason,
            "refund reconciliation required"
        );
        BotError::Reconciliation {
            user_id,
            timestamp,
            charge_id: charge_id.to_string(),
            reason,
        }
    }

    fn validate_amount(&self, stars: u32) -> Result<(), BotError> {
        if stars == 0 {
            return Err(BotError::InvalidInput("stars must be > 0".to_string()));
        }
        if stars > self.policy.max_donation_stars {
            return Err(BotError::InvalidInput(format!(
                "stars exceeds max_donation_stars ({})",
                self.policy.max_donation_stars
            )));
        }
        Ok(())
    }

    async fn send_prompt(&self, user_id: UserId, text: &str) -> Result<MessageId, BotError> {
        let prompt_id = self
            .chat
            .send_message(user_id, OutboundMessage::plain(text).force_reply())
            .await?;
        self.conversation
            .set_pending_prompt(user_id, prompt_id)
            .await?;
        Ok(prompt_id)
    }

    async fn notify(&self, user_id: UserId, message: OutboundMessage) {
        if let Err(error) = self.chat.send_message(user_id, message).await {
            tracing::warn!(user_id, reason = %error, "notification delivery failed");
        }
    }
}

pub fn parse_star_amount(text: &str) -> Option<u32> {
    text.trim().parse::<u32>().ok().filter(|stars| *stars >= 1)
}

pub fn parse_refund_callback(data: &str) -> Option<(UserId, i64)> {
    let rest = data.strip_prefix(REFUND_CALLBACK_PREFIX)?;
    let (user_id, timestamp) = rest.split_once('_')?;
    Some((user_id.parse().ok()?, timestamp.parse().ok()?))
}

fn to_datetime(timestamp_ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or_default()
}

fn format_date(timestamp_ms: i64) -> String {
    to_datetime(timestamp_ms).format("%-m/%-d/%y").to_string()
}

fn format_datetime(timestamp_ms: i64) -> String {
    to_datetime(timestamp_ms)
        .format("%b %-d, %Y, %-I:%M %p")
        .to_string()
}
