//! Donation records and the payment-attempt lifecycle.
//!
//! A payment attempt moves `Invoiced -> Prechecked -> Captured -> Refunded`.
//! Only the captured and refunded stages are persisted (as a
//! [`DonationRecord`]); the earlier stages live in the invoice payload that the
//! provider round-trips. Each stage is its own type and is only constructible
//! from the previous one, so a refund can never be requested for an attempt
//! that was not captured.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::UserId;

pub const DONATION_PAYLOAD_KIND: &str = "donation";
pub const DONATION_CURRENCY: &str = "XTR";
pub const DONATION_START_PARAMETER: &str = "donation";
pub const PRESET_DONATION_AMOUNTS: [u32; 5] = [9, 33, 69, 333, 777];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationRecord {
    pub user_id: UserId,
    pub stars: u32,
    pub timestamp: i64,
    pub payment_charge_id: String,
    pub refunded: bool,
}

impl DonationRecord {
    /// First eight characters of the charge id, for display.
    pub fn short_charge_id(&self) -> &str {
        match self.payment_charge_id.char_indices().nth(8) {
            Some((index, _)) => &self.payment_charge_id[..index],
            None => &self.payment_charge_id,
        }
    }

    pub fn into_refundable(self) -> Option<RefundableDonation> {
        if self.refunded {
            None
        } else {
            Some(RefundableDonation(self))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not a donation invoice")]
    NotDonation,
    #[error("malformed donation payload: {0}")]
    Malformed(String),
}

/// `donation:<userId>:<stars>:<issuedAtMs>`, carried opaquely by the provider
/// from invoice issuance to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoicePayload {
    pub user_id: UserId,
    pub stars: u32,
    pub issued_at_ms: i64,
}

impl InvoicePayload {
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let Some(rest) = raw
            .strip_prefix(DONATION_PAYLOAD_KIND)
            .and_then(|rest| rest.strip_prefix(':'))
        else {
            return Err(PayloadError::NotDonation);
        };
        let mut fields = rest.split(':');
        let (Some(user_id), Some(stars), Some(issued_at_ms), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(PayloadError::Malformed(raw.to_string()));
        };
        let user_id = user_id
            .parse::<UserId>()
            .map_err(|error| PayloadError::Malformed(format!("user id: {error}")))?;
        let stars = stars
            .parse::<u32>()
            .map_err(|error| PayloadError::Malformed(format!("stars: {error}")))?;
        if stars == 0 {
            return Err(PayloadError::Malformed("stars must be > 0".to_string()));
        }
        let issued_at_ms = issued_at_ms
            .parse::<i64>()
            .map_err(|error| PayloadError::Malformed(format!("timestamp: {error}")))?;
        Ok(Self {
            user_id,
            stars,
            issued_at_ms,
        })
    }
}

impl fmt::Display for InvoicePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DONATION_PAYLOAD_KIND}:{}:{}:{}",
            self.user_id, self.stars, self.issued_at_ms
        )
    }
}

/// Invoice presented to the user. Nothing has been stored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedInvoice {
    payload: InvoicePayload,
}

impl IssuedInvoice {
    pub fn new(user_id: UserId, stars: u32, issued_at_ms: i64) -> Option<Self> {
        (stars > 0).then_some(Self {
            payload: InvoicePayload {
                user_id,
                stars,
                issued_at_ms,
            },
        })
    }

    pub fn payload(&self) -> InvoicePayload {
        self.payload
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecheckRejection {
    NotDonation,
    Malformed,
    UserMismatch,
}

impl PrecheckRejection {
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotDonation => "Invalid invoice type.",
            Self::Malformed => "Invalid invoice payload.",
            Self::UserMismatch => "User ID mismatch.",
        }
    }
}

/// Invoice whose payload passed pre-checkout for the paying identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecheckedPayment {
    payload: InvoicePayload,
}

impl PrecheckedPayment {
    pub fn validate(raw_payload: &str, payer: UserId) -> Result<Self, PrecheckRejection> {
        let payload = InvoicePayload::parse(raw_payload).map_err(|error| match error {
            PayloadError::NotDonation => PrecheckRejection::NotDonation,
            PayloadError::Malformed(_) => PrecheckRejection::Malformed,
        })?;
        if payload.user_id != payer {
            return Err(PrecheckRejection::UserMismatch);
        }
        Ok(Self { payload })
    }

    pub fn payload(&self) -> InvoicePayload {
        self.payload
    }

    pub fn capture(self, payer: UserId, payment_charge_id: String) -> CapturedPayment {
        CapturedPayment {
            payer,
            stars: self.payload.stars,
            payment_charge_id,
        }
    }
}

/// Payment the provider confirmed. The ledger turns this into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPayment {
    pub payer: UserId,
    pub stars: u32,
    pub payment_charge_id: String,
}

impl CapturedPayment {
    /// Builds a capture from a successful-payment event. The provider only
    /// delivers this after pre-checkout accepted, so the payload is validated
    /// again against the payer rather than trusted blindly.
    pub fn from_successful_payment(
        raw_payload: &str,
        payer: UserId,
        payment_charge_id: String,
    ) -> Result<Self, PayloadError> {
        match PrecheckedPayment::validate(raw_payload, payer) {
            Ok(prechecked) => Ok(prechecked.capture(payer, payment_charge_id)),
            Err(PrecheckRejection::NotDonation) => Err(PayloadError::NotDonation),
            Err(PrecheckRejection::Malformed) => {
                Err(PayloadError::Malformed(raw_payload.to_string()))
            }
            Err(PrecheckRejection::UserMismatch) => {
                // Money already moved; record it against the identity that paid.
                let payload = InvoicePayload::parse(raw_payload)?;
                tracing::warn!(
                    payer,
                    payload_user_id = payload.user_id,
                    "captured donation payload names a different user"
                );
                Ok(Self {
                    payer,
                    stars: payload.stars,
                    payment_charge_id,
                })
            }
        }
    }
}

/// A stored donation that has not been refunded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundableDonation(DonationRecord);

impl RefundableDonation {
    pub fn record(&self) -> &DonationRecord {
        &self.0
    }

    pub fn into_refunded(self) -> DonationRecord {
        DonationRecord {
            refunded: true,
            ..self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CapturedPayment, DonationRecord, InvoicePayload, IssuedInvoice, PayloadError,
        PrecheckRejection, PrecheckedPayment,
    };

    #[test]
    fn payload_display_matches_wire_format() {
        let invoice = IssuedInvoice::new(42, 33, 1_700_000_000_123).expect("positive stars");
        assert_eq!(invoice.payload().to_string(), "donation:42:33:1700000000123");
        assert!(IssuedInvoice::new(42, 0, 1).is_none());
    }

    #[test]
    fn payload_parse_rejects_other_kinds_and_garbage() {
        assert_eq!(
            InvoicePayload::parse("subscription:1:2:3"),
            Err(PayloadError::NotDonation)
        );
        assert_eq!(
            InvoicePayload::parse("donations:1:2:3"),
            Err(PayloadError::NotDonation)
        );
        assert!(matches!(
            InvoicePayload::parse("donation:1:abc:3"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            InvoicePayload::parse("donation:1:2:3:4"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            InvoicePayload::parse("donation:1:0:3"),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn precheck_requires_matching_payer() {
        let ok = PrecheckedPayment::validate("donation:7:9:100", 7).expect("valid");
        assert_eq!(ok.payload().stars, 9);
        assert_eq!(
            PrecheckedPayment::validate("donation:7:9:100", 8),
            Err(PrecheckRejection::UserMismatch)
        );
        assert_eq!(
            PrecheckedPayment::validate("gift:7:9:100", 7),
            Err(PrecheckRejection::NotDonation)
        );
    }

    #[test]
    fn capture_records_against_the_payer() {
        let captured =
            CapturedPayment::from_successful_payment("donation:7:9:100", 8, "ch_1".to_string())
                .expect("capture");
        assert_eq!(captured.payer, 8);
        assert_eq!(captured.stars, 9);
    }

    #[test]
    fn refunded_records_are_not_refundable() {
        let record = DonationRecord {
            user_id: 1,
            stars: 5,
            timestamp: 10,
            payment_charge_id: "abcdefghijkl".to_string(),
            refunded: false,
        };
        assert_eq!(record.short_charge_id(), "abcdefgh");
        let refunded = record
            .into_refundable()
            .expect("refundable")
            .into_refunded();
        assert!(refunded.refunded);
        assert!(refunded.into_refundable().is_none());
    }
}
