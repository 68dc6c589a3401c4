//! In-process card rasterizer: lays the card out as SVG and renders it with
//! resvg against the Lora faces loaded at startup.

use std::sync::Arc;

use async_trait::async_trait;
use resvg::tiny_skia::{Pixmap, Transform};
use usvg::fontdb;

use super::render::{FontAsset, HighlightCard, HighlightRenderer, RenderError};

const FONT_FAMILY: &str = "Lora, serif";
const LINE_HEIGHT: f64 = 1.2;
/// Average advance of a Lora glyph, in em. Used only for line breaking.
const GLYPH_ADVANCE_EM: f64 = 0.5;
const AUTHOR_FONT_SIZE: u32 = 28;
const TITLE_FONT_SIZE: u32 = 22;
const FOOTER_GAP: u32 = 6;

pub struct ResvgRenderer {
    fontdb: Arc<fontdb::Database>,
}

impl ResvgRenderer {
    pub fn new(fonts: &[FontAsset]) -> Self {
        let mut fontdb = fontdb::Database::new();
        for font in fonts {
            fontdb.load_font_data(font.data.as_ref().clone());
        }
        tracing::info!(faces = fontdb.len(), "highlight rasterizer ready");
        Self {
            fontdb: Arc::new(fontdb),
        }
    }

    /// Fallback when the Lora files are missing: whatever serif the host has.
    pub fn with_system_fonts() -> Self {
        let mut fontdb = fontdb::Database::new();
        fontdb.load_system_fonts();
        tracing::info!(faces = fontdb.len(), "highlight rasterizer using system fonts");
        Self {
            fontdb: Arc::new(fontdb),
        }
    }
}

#[async_trait]
impl HighlightRenderer for ResvgRenderer {
    async fn render(&self, card: &HighlightCard) -> Result<Vec<u8>, RenderError> {
        let svg = card_svg(card);
        let fontdb = self.fontdb.clone();
        tokio::task::spawn_blocking(move || rasterize(&svg, fontdb))
            .await
            .map_err(|error| RenderError::Raster(error.to_string()))?
    }
}

fn rasterize(svg: &str, fontdb: Arc<fontdb::Database>) -> Result<Vec<u8>, RenderError> {
    let options = usvg::Options {
        fontdb,
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_str(svg, &options)
        .map_err(|error| RenderError::Raster(error.to_string()))?;
    let size = tree.size().to_int_size();
    let mut pixmap = Pixmap::new(size.width(), size.height()).ok_or_else(|| {
        RenderError::Raster(format!("invalid canvas {}x{}", size.width(), size.height()))
    })?;
    resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());
    pixmap
        .encode_png()
        .map_err(|error| RenderError::Raster(error.to_string()))
}

/// SVG document for `card`. Text fields are expected to be sanitized already:
/// no angle brackets, ampersands escaped.
pub fn card_svg(card: &HighlightCard) -> String {
    let padding = f64::from(card.padding);
    let font_size = f64::from(card.font_size);
    let text_width = (f64::from(card.width) - 2.0 * padding).max(font_size);
    let max_chars = ((text_width / (font_size * GLYPH_ADVANCE_EM)).floor() as usize).max(1);
    let line_height = font_size * LINE_HEIGHT;

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = card.width,
        h = card.height,
    );
    svg.push_str(&format!(
        r#"<rect width="100%" height="100%" fill="{}"/>"#,
        card.colors.background
    ));

    svg.push_str(&format!(
        r#"<text font-family="{FONT_FAMILY}" font-size="{}" font-weight="{}" fill="{}" fill-opacity="0.94" letter-spacing="-0.5">"#,
        card.font_size, card.font_weight, card.colors.text
    ));
    for (index, line) in wrap_lines(&card.text, max_chars).iter().enumerate() {
        let baseline = padding + font_size + line_height * index as f64;
        svg.push_str(&format!(
            r#"<tspan x="{padding}" y="{baseline:.1}">{line}</tspan>"#
        ));
    }
    svg.push_str("</text>");

    let bottom = f64::from(card.height) - padding;
    let title = card.title.as_deref().filter(|title| !title.is_empty());
    let author = card.author.as_deref().filter(|author| !author.is_empty());
    if let Some(title) = title {
        // Uppercasing must not touch the entity escapes.
        let title = title.to_uppercase().replace("&AMP;", "&amp;");
        svg.push_str(&format!(
            r#"<text x="{padding}" y="{bottom}" font-family="{FONT_FAMILY}" font-size="{TITLE_FONT_SIZE}" font-weight="400" fill="{}" fill-opacity="0.9">{title}</text>"#,
            card.colors.meta_text
        ));
    }
    if let Some(author) = author {
        let baseline = if title.is_some() {
            bottom - f64::from(TITLE_FONT_SIZE + FOOTER_GAP)
        } else {
            bottom
        };
        svg.push_str(&format!(
            r#"<text x="{padding}" y="{baseline}" font-family="{FONT_FAMILY}" font-size="{AUTHOR_FONT_SIZE}" font-weight="500" fill="{}" letter-spacing="0.5">{author}</text>"#,
            card.colors.author_text
        ));
    }

    svg.push_str("</svg>");
    svg
}

/// Greedy word wrap at `max_chars` per line. Explicit newlines are kept and
/// words longer than a line are left whole.
pub fn wrap_lines(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        let mut line_chars = 0;
        for word in paragraph.split_whitespace() {
            let word_chars = word.chars().count();
            if line_chars > 0 && line_chars + 1 + word_chars > max_chars {
                lines.push(std::mem::take(&mut line));
                line_chars = 0;
            }
            if line_chars > 0 {
                line.push(' ');
                line_chars += 1;
            }
            line.push_str(word);
            line_chars += word_chars;
        }
        lines.push(line);
    }
    lines
}
