use std::sync::Arc;

use anyhow::Result;

use super::{
    HighlightDelivery, HighlightError, HighlightRenderer, HighlightRequest, HighlightService,
    LayoutConfig, ScriptClassifier,
};
use crate::identity::{IdentityStore, Theme};
use crate::kv;
use crate::testing::{RecordingChat, RecordingRenderer, Sent};
use crate::transport::ParseMode;

struct Harness {
    service: HighlightService,
    identity: IdentityStore,
    chat: Arc<RecordingChat>,
    renderer: Arc<RecordingRenderer>,
}

fn harness() -> Harness {
    let identity = IdentityStore::new(kv::memory());
    let chat = RecordingChat::new();
    let renderer = RecordingRenderer::new();
    let service = HighlightService::new(
        identity.clone(),
        chat.clone(),
        Some(renderer.clone() as Arc<dyn HighlightRenderer>),
        Arc::new(ScriptClassifier),
        LayoutConfig::default(),
        Vec::new(),
    );
    Harness {
        service,
        identity,
        chat,
        renderer,
    }
}

fn request(code: &str, text: &str) -> HighlightRequest {
    HighlightRequest {
        code: Some(code.to_string()),
        text: Some(text.to_string()),
        title: Some("Dune".to_string()),
        author: Some("Frank Herbert".to_string()),
    }
}

#[tokio::test]
async fn missing_fields_are_rejected_before_lookup() -> Result<()> {
    let h = harness();
    let mut incomplete = request("ABCD1234", "text");
    incomplete.title = Some(String::new());
    let result = h.service.submit(incomplete).await;
    assert!(matches!(result, Err(HighlightError::MissingFields)));
    assert!(h.chat.sent().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_code_is_invalid() -> Result<()> {
    let h = harness();
    let result = h.service.submit(request("NOPE0000", "Fear is the mind-killer.")).await;
    let error = result.err().ok_or_else(|| anyhow::anyhow!("expected rejection"))?;
    assert_eq!(error.message(), "Invalid verification code");
    assert!(h.renderer.cards().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn latin_text_is_rendered_then_quoted() -> Result<()> {
    let h = harness();
    let (record, _) = h.identity.ensure_record(8).await?;
    h.identity.set_theme(8, Theme::Light).await?;

    let delivery = h
        .service
        .submit(request(&record.key, "Fear is the mind\u{2014}killer."))
        .await?;
    assert_eq!(delivery, HighlightDelivery::Image);

    let cards = h.renderer.cards().await;
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].text, "Fear is the mind-killer.");
    assert_eq!(cards[0].colors.background, "#ffffff");
    assert_eq!((cards[0].width, cards[0].font_size, cards[0].font_weight), (603, 55, 500));

    let sent = h.chat.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[0], Sent::Photo { chat_id: 8, file_name, .. } if file_name == "highlight.png"));
    match &sent[1] {
        Sent::Message { chat_id, message, .. } => {
            assert_eq!(*chat_id, 8);
            assert_eq!(message.parse_mode, Some(ParseMode::MarkdownV2));
            assert!(message.text.starts_with(">Fear is the mind\u{2014}killer\\."));
            assert!(message.text.ends_with("*Frank Herbert*\n_Dune_"));
        }
        other => anyhow::bail!("expected caption, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn arabic_text_skips_rendering() -> Result<()> {
    let h = harness();
    let (record, _) = h.identity.ensure_record(9).await?;

    let delivery = h
        .service
        .submit(request(&record.key, "الصبر مفتاح الفرج"))
        .await?;
    assert_eq!(delivery, HighlightDelivery::TextOnly);
    assert!(h.renderer.cards().await.is_empty());
    let sent = h.chat.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], Sent::Message { chat_id: 9, .. }));
    Ok(())
}

#[tokio::test]
async fn without_renderer_every_highlight_is_text() -> Result<()> {
    let identity = IdentityStore::new(kv::memory());
    let chat = RecordingChat::new();
    let service = HighlightService::new(
        identity.clone(),
        chat.clone(),
        None,
        Arc::new(ScriptClassifier),
        LayoutConfig::default(),
        Vec::new(),
    );
    let (record, _) = identity.ensure_record(4).await?;
    let delivery = service.submit(request(&record.key, "Plain words.")).await?;
    assert_eq!(delivery, HighlightDelivery::TextOnly);
    assert_eq!(chat.texts_to(4).await.len(), 1);
    Ok(())
}
