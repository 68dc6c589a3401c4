//! Highlight Request Handler: verification-code check, sanitizing, and
//! delivery of the rendered card plus quote caption.

pub mod language;
pub mod layout;
pub mod raster;
pub mod render;
pub mod sanitize;

use std::sync::Arc;

use serde::Deserialize;

use crate::identity::{IdentityStore, KeyResolution, UserId};
use crate::kv::StoreError;
use crate::transport::{ChatTransport, OutboundMessage, TransportError};

pub use language::{ARABIC_LANGUAGE_CODE, LanguageClassifier, ScriptClassifier};
pub use layout::{Layout, LayoutConfig, calculate_layout};
pub use raster::ResvgRenderer;
pub use render::{FontAsset, HighlightCard, HighlightRenderer, HttpRenderer, RenderError, ThemeColors};

pub const HIGHLIGHT_FILE_NAME: &str = "highlight.png";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HighlightRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum HighlightError {
    #[error("missing required fields")]
    MissingFields,
    #[error("invalid verification code")]
    InvalidCode,
    #[error("user record not found for {0}")]
    UserRecordMissing(UserId),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Delivery(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HighlightError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields => "missing_fields",
            Self::InvalidCode => "invalid_code",
            Self::UserRecordMissing(_) => "user_record_missing",
            Self::Render(_) => "render_error",
            Self::Delivery(_) => "delivery_error",
            Self::Store(_) => "store_error",
        }
    }

    /// Caller-facing text. Internal failures are not described.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingFields => "Missing required fields: code, text, title",
            Self::InvalidCode => "Invalid verification code",
            Self::UserRecordMissing(_) => "User record not found",
            Self::Render(_) | Self::Delivery(_) | Self::Store(_) => "Internal server error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightDelivery {
    Image,
    TextOnly,
}

struct ValidatedRequest {
    code: String,
    text: String,
    title: String,
    author: Option<String>,
}

impl HighlightRequest {
    fn validate(self) -> Result<ValidatedRequest, HighlightError> {
        let present = |value: Option<String>| value.filter(|value| !value.is_empty());
        let (Some(code), Some(text), Some(title)) =
            (present(self.code), present(self.text), present(self.title))
        else {
            return Err(HighlightError::MissingFields);
        };
        Ok(ValidatedRequest {
            code,
            text,
            title,
            author: present(self.author),
        })
    }
}

#[derive(Clone)]
pub struct HighlightService {
    identity: IdentityStore,
    chat: Arc<dyn ChatTransport>,
    renderer: Option<Arc<dyn HighlightRenderer>>,
    classifier: Arc<dyn LanguageClassifier>,
    layout: LayoutConfig,
    fonts: Arc<Vec<FontAsset>>,
}

impl HighlightService {
    pub fn new(
        identity: IdentityStore,
        chat: Arc<dyn ChatTransport>,
        renderer: Option<Arc<dyn HighlightRenderer>>,
        classifier: Arc<dyn LanguageClassifier>,
        layout: LayoutConfig,
        fonts: Vec<FontAsset>,
    ) -> Self {
        Self {
            identity,
            chat,
            renderer,
            classifier,
            layout,
            fonts: Arc::new(fonts),
        }
    }

    /// Delivers one highlight to the owner of `request.code`. Not idempotent:
    /// a resubmission sends the image and caption again.
    pub async fn submit(&self, request: HighlightRequest) -> Result<HighlightDelivery, HighlightError> {
        let request = request.validate()?;

        let (user_id, record) = match self.identity.resolve_key(&request.code).await? {
            KeyResolution::Resolved(user_id, record) => (user_id, record),
            KeyResolution::Unknown => {
                tracing::warn!("highlight submitted with unknown verification code");
                return Err(HighlightError::InvalidCode);
            }
            KeyResolution::Orphaned(user_id) => {
                tracing::error!(user_id, "verification key resolves to a user without a record");
                return Err(HighlightError::UserRecordMissing(user_id));
            }
        };

        let safe_text = sanitize::sanitize_text(&request.text);
        let caption = OutboundMessage::markdown_v2(sanitize::quote_message(
            &request.text,
            request.author.as_deref(),
            Some(&request.title),
        ));

        let language = self.classifier.classify(&safe_text);
        let renderer = match &self.renderer {
            Some(renderer) if language != ARABIC_LANGUAGE_CODE => renderer,
            _ => {
                tracing::info!(user_id, language = %language, "delivering highlight as text");
                self.chat.send_message(user_id, caption).await?;
                return Ok(HighlightDelivery::TextOnly);
            }
        };

        let card_layout = calculate_layout(&safe_text, &self.layout);
        let card = HighlightCard {
            font_weight: layout::body_font_weight(&safe_text),
            text: safe_text,
            author: request.author.as_deref().map(sanitize::sanitize_text),
            title: Some(sanitize::sanitize_text(&request.title)),
            colors: ThemeColors::for_theme(record.theme),
            width: card_layout.card_width,
            height: card_layout.card_height,
            font_size: card_layout.font_size,
            padding: self.layout.padding,
            fonts: self.fonts.as_ref().clone(),
        };
        let image = renderer.render(&card).await?;
        self.chat
            .send_photo(user_id, image, HIGHLIGHT_FILE_NAME)
            .await?;
        self.chat.send_message(user_id, caption).await?;
        tracing::info!(
            user_id,
            width = card_layout.card_width,
            height = card_layout.card_height,
            font_size = card_layout.font_size,
            "highlight delivered"
        );
        Ok(HighlightDelivery::Image)
    }
}

#[cfg(test)]
mod tests;
