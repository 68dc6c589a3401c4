use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::{AppState, build_router};
use crate::bot::BotService;
use crate::donations::{ConversationTracker, DonationLedger, PaymentController, PaymentPolicy};
use crate::highlight::{HighlightRenderer, HighlightService, LayoutConfig, ScriptClassifier};
use crate::identity::IdentityStore;
use crate::kv;
use crate::testing::{RecordingChat, RecordingPayments, RecordingRenderer, Sent};

const SECRET: &str = "hook-secret";

struct TestApp {
    router: Router,
    identity: IdentityStore,
    ledger: DonationLedger,
    chat: Arc<RecordingChat>,
    renderer: Arc<RecordingRenderer>,
    payments: Arc<RecordingPayments>,
}

fn test_app() -> TestApp {
    let store = kv::memory();
    let identity = IdentityStore::new(store.clone());
    let ledger = DonationLedger::new(store.clone());
    let chat = RecordingChat::new();
    let payments = RecordingPayments::new();
    let renderer = RecordingRenderer::new();
    let controller = PaymentController::new(
        ledger.clone(),
        ConversationTracker::new(store),
        chat.clone(),
        payments.clone(),
        PaymentPolicy {
            owner_id: Some(1),
            ..PaymentPolicy::default()
        },
    );
    let bot = BotService::new(identity.clone(), controller, chat.clone());
    let highlights = HighlightService::new(
        identity.clone(),
        chat.clone(),
        Some(renderer.clone() as Arc<dyn HighlightRenderer>),
        Arc::new(ScriptClassifier),
        LayoutConfig::default(),
        Vec::new(),
    );
    TestApp {
        router: build_router(AppState::new(bot, highlights, SECRET)),
        identity,
        ledger,
        chat,
        renderer,
        payments,
    }
}

fn post_json(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body)?))?)
}

async fn body_json(response: axum::response::Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

async fn body_text(response: axum::response::Response) -> Result<String> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8(bytes.to_vec())?)
}

#[tokio::test]
async fn healthz_reports_ok() -> Result<()> {
    let app = test_app();
    let response = app
        .router
        .oneshot(Request::builder().uri("/healthz").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?, json!({ "ok": true }));
    Ok(())
}

#[tokio::test]
async fn non_post_highlight_is_not_found() -> Result<()> {
    let app = test_app();
    let plain = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/highlight").body(Body::empty())?)
        .await?;
    assert_eq!(plain.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(plain).await?, "Not Found");

    let with_secret = app
        .router
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/highlight?secret={SECRET}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(with_secret.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn unknown_code_is_forbidden() -> Result<()> {
    let app = test_app();
    let response = app
        .router
        .oneshot(post_json(
            "/highlight",
            &json!({ "code": "NOPE1234", "text": "words", "title": "Book" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await?,
        json!({ "error": "Invalid verification code" })
    );
    Ok(())
}

#[tokio::test]
async fn missing_fields_and_empty_body_are_bad_requests() -> Result<()> {
    let app = test_app();
    let missing = app
        .router
        .clone()
        .oneshot(post_json("/highlight", &json!({ "code": "ABC", "text": "t" }))?)
        .await?;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(missing).await?,
        json!({ "error": "Missing required fields: code, text, title" })
    );

    let empty = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/highlight")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(empty).await?,
        json!({ "error": "Request body missing" })
    );
    Ok(())
}

#[tokio::test]
async fn arabic_highlight_is_sent_as_text_only() -> Result<()> {
    let app = test_app();
    let (record, _) = app.identity.ensure_record(21).await?;
    let response = app
        .router
        .oneshot(post_json(
            "/highlight",
            &json!({
                "code": record.key,
                "text": "العلم نور",
                "title": "كتاب",
                "author": "مؤلف",
            }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?, json!({ "success": true }));
    assert!(app.renderer.cards().await.is_empty());
    let sent = app.chat.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], Sent::Message { chat_id: 21, .. }));
    Ok(())
}

#[tokio::test]
async fn latin_highlight_is_rendered() -> Result<()> {
    let app = test_app();
    let (record, _) = app.identity.ensure_record(22).await?;
    let response = app
        .router
        .oneshot(post_json(
            "/highlight",
            &json!({ "code": record.key, "text": "Call me Ishmael.", "title": "Moby-Dick" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.renderer.cards().await.len(), 1);
    assert!(matches!(app.chat.sent().await[0], Sent::Photo { chat_id: 22, .. }));
    Ok(())
}

#[tokio::test]
async fn webhook_requires_the_shared_secret() -> Result<()> {
    let app = test_app();
    let update = json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "from": { "id": 30 },
            "chat": { "id": 30 },
            "text": "/start",
        }
    });

    let without = app.router.clone().oneshot(post_json("/", &update)?).await?;
    assert_eq!(without.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(without).await?, "Not Found");

    let wrong = app
        .router
        .clone()
        .oneshot(post_json("/?secret=nope", &update)?)
        .await?;
    assert_eq!(wrong.status(), StatusCode::NOT_FOUND);
    assert!(app.identity.get_record(30).await?.is_none());

    let accepted = app
        .router
        .oneshot(post_json(&format!("/?secret={SECRET}"), &update)?)
        .await?;
    assert_eq!(accepted.status(), StatusCode::OK);
    assert!(app.identity.get_record(30).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn undecodable_update_is_a_webhook_error() -> Result<()> {
    let app = test_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhook?secret={SECRET}"))
                .body(Body::from("{not json"))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await?, "Webhook Error");
    Ok(())
}

#[tokio::test]
async fn donation_then_refund_over_the_webhook() -> Result<()> {
    let app = test_app();
    let hook = format!("/?secret={SECRET}");
    let callback = |id: &str, data: &str| {
        json!({
            "update_id": 2,
            "callback_query": {
                "id": id,
                "from": { "id": 42 },
                "message": { "message_id": 5, "chat": { "id": 42 } },
                "data": data,
            }
        })
    };

    app.router
        .clone()
        .oneshot(post_json(&hook, &callback("cb-1", "donate_33"))?)
        .await?;
    let payload = app
        .payments
        .invoices()
        .await
        .first()
        .map(|invoice| invoice.payload.clone())
        .ok_or_else(|| anyhow::anyhow!("invoice should be issued"))?;
    assert!(payload.starts_with("donation:42:33:"));

    app.router
        .clone()
        .oneshot(post_json(
            &hook,
            &json!({
                "update_id": 3,
                "message": {
                    "message_id": 6,
                    "from": { "id": 42 },
                    "chat": { "id": 42 },
                    "successful_payment": {
                        "currency": "XTR",
                        "total_amount": 33,
                        "invoice_payload": payload,
                        "telegram_payment_charge_id": "stxWEBHOOK0001",
                    }
                }
            }),
        )?)
        .await?;
    let donations = app.ledger.list_for_user(42).await?;
    assert_eq!(donations.len(), 1);

    let data = format!("refund_42_{}", donations[0].timestamp);
    let response = app
        .router
        .oneshot(post_json(&hook, &callback("cb-2", &data))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.payments.reversals().await,
        vec![(42, "stxWEBHOOK0001".to_string())]
    );
    assert!(app.ledger.list_for_user(42).await?[0].refunded);
    assert_eq!(app.chat.texts_to(1).await.len(), 1);
    Ok(())
}
