use crate::identity::UserId;
use crate::kv::StoreError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already refunded")]
    AlreadyRefunded,
    #[error("provider error: {0}")]
    Provider(#[from] TransportError),
    #[error(
        "charge {charge_id} reversed but ledger entry ({user_id}, {timestamp}) not updated: {reason}"
    )]
    Reconciliation {
        user_id: UserId,
        timestamp: i64,
        charge_id: String,
        reason: String,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl BotError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::AlreadyRefunded => "already_refunded",
            Self::Provider(_) => "provider_error",
            Self::Reconciliation { .. } => "reconciliation_required",
            Self::Store(_) => "store_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput(message)
            | Self::Unauthorized(message)
            | Self::NotFound(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
