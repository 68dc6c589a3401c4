//! Rendering collaborator: turns a styled highlight card into PNG bytes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Serialize, Serializer};

use crate::identity::Theme;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("font asset unavailable: {0}")]
    Font(String),
    #[error("render transport error: {0}")]
    Transport(String),
    #[error("renderer returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rasterization failed: {0}")]
    Raster(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeColors {
    pub background: &'static str,
    pub text: &'static str,
    pub meta_text: &'static str,
    pub author_text: &'static str,
}

impl ThemeColors {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                background: "#0e0e0e",
                text: "#ffffff",
                meta_text: "#b0b0b0",
                author_text: "#f7f4ef",
            },
            Theme::Light => Self {
                background: "#ffffff",
                text: "#000000",
                meta_text: "#666666",
                author_text: "#333333",
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    Normal,
    Italic,
}

#[derive(Debug, Clone, Serialize)]
pub struct FontAsset {
    pub name: String,
    pub weight: u16,
    pub style: FontStyle,
    #[serde(serialize_with = "serialize_base64")]
    pub data: Arc<Vec<u8>>,
}

const LORA_FACES: [(&str, u16, FontStyle); 3] = [
    ("Lora-MediumItalic.ttf", 500, FontStyle::Italic),
    ("Lora-Regular.ttf", 400, FontStyle::Normal),
    ("Lora-Medium.ttf", 500, FontStyle::Normal),
];

/// Reads the Lora faces from `dir`. Called once at startup.
pub async fn load_lora_fonts(dir: &Path) -> Result<Vec<FontAsset>, RenderError> {
    let mut fonts = Vec::with_capacity(LORA_FACES.len());
    for (file_name, weight, style) in LORA_FACES {
        let path = dir.join(file_name);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|error| RenderError::Font(format!("{}: {error}", path.display())))?;
        fonts.push(FontAsset {
            name: "Lora".to_string(),
            weight,
            style,
            data: Arc::new(data),
        });
    }
    Ok(fonts)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightCard {
    pub text: String,
    pub author: Option<String>,
    pub title: Option<String>,
    pub colors: ThemeColors,
    pub width: u32,
    pub height: u32,
    pub font_size: u32,
    pub font_weight: u16,
    pub padding: u32,
    pub fonts: Vec<FontAsset>,
}

#[async_trait]
pub trait HighlightRenderer: Send + Sync {
    async fn render(&self, card: &HighlightCard) -> Result<Vec<u8>, RenderError>;
}

/// Posts the card as JSON to an external rendering service and returns the
/// response body as the image.
pub struct HttpRenderer {
    client: reqwest::Client,
    url: String,
}

impl HttpRenderer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RenderError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HighlightRenderer for HttpRenderer {
    async fn render(&self, card: &HighlightCard) -> Result<Vec<u8>, RenderError> {
        let response = self
            .client
            .post(&self.url)
            .header("accept", "image/png")
            .json(card)
            .send()
            .await
            .map_err(|error| RenderError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RenderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|error| RenderError::Transport(error.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn serialize_base64<S: Serializer>(data: &Arc<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data.as_slice()))
}
