use actix_web::{http::StatusCode, test, test::TestRequest, App};
use serde_json::json;
use upscale_gate_engine::{db_types::Tier, helpers::webhook_signature::paddle_signature_header};

use super::{
    helpers::{
        creem_signature,
        paddle_signature,
        send,
        TestContext,
        CREEM_EARLY_BIRD,
        NOW_SECS,
        PADDLE_EARLY_BIRD,
        PADDLE_SECRET,
    },
    mocks::unreachable_upscaler,
};

fn paddle_event(event_id: &str, event_type: &str, price_id: &str) -> String {
    json!({
        "event_id": event_id,
        "event_type": event_type,
        "occurred_at": "2023-11-14T22:13:20Z",
        "data": {
            "id": "txn_01",
            "items": [{ "price": { "id": price_id }, "quantity": 1 }],
            "custom_data": { "installId": "abc123" },
            "customer": { "email": "Buyer@Example.com" }
        }
    })
    .to_string()
}

fn signed_paddle(ctx: &TestContext, body: &str) -> actix_http::Request {
    TestRequest::post()
        .uri("/webhooks/paddle")
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("Paddle-Signature", paddle_signature(ctx, body)))
        .set_payload(body.to_string())
        .to_request()
}

#[actix_web::test]
async fn paddle_purchase_is_granted_once() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let body = paddle_event("evt_01", "transaction.completed", PADDLE_EARLY_BIRD);
    let reply = send(&app, signed_paddle(&ctx, &body)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"ok": true}));

    let api = ctx.entitlements();
    let record = api.get_by_install_id("abc123").await.unwrap().unwrap();
    assert_eq!(record.tier, Tier::EarlyBird);
    assert_eq!(record.price_id, PADDLE_EARLY_BIRD);
    assert_eq!(record.updated_at, NOW_SECS * 1000);
    let by_email = api.get_by_email("buyer@example.com").await.unwrap().unwrap();
    assert_eq!(by_email.install_id.as_deref(), Some("abc123"));
    assert_eq!(api.get_early_bird_sold().await.unwrap(), 1);

    // Paddle retries deliver the same event id again
    let reply = send(&app, signed_paddle(&ctx, &body)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"ok": true, "deduped": true}));
    assert_eq!(api.get_early_bird_sold().await.unwrap(), 1);
}

#[actix_web::test]
async fn paddle_events_that_grant_nothing() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let body = paddle_event("evt_02", "transaction.created", PADDLE_EARLY_BIRD);
    let reply = send(&app, signed_paddle(&ctx, &body)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"ok": true, "ignored": "transaction.created"}));

    let body = paddle_event("evt_03", "transaction.completed", "pri_unknown");
    let reply = send(&app, signed_paddle(&ctx, &body)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["ignored"], "unmapped_price");
    assert!(ctx.entitlements().get_by_install_id("abc123").await.unwrap().is_none());
    assert_eq!(ctx.entitlements().get_early_bird_sold().await.unwrap(), 0);
}

#[actix_web::test]
async fn paddle_signature_failures() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let body = paddle_event("evt_04", "transaction.completed", PADDLE_EARLY_BIRD);

    let req = TestRequest::post().uri("/webhooks/paddle").set_payload(body.clone()).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_code(), "invalid_signature");

    let tampered = body.replace("abc123", "attacker");
    let req = TestRequest::post()
        .uri("/webhooks/paddle")
        .insert_header(("Paddle-Signature", paddle_signature(&ctx, &body)))
        .set_payload(tampered)
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let stale = paddle_signature_header(PADDLE_SECRET.as_bytes(), NOW_SECS - 301, body.as_bytes());
    let req =
        TestRequest::post().uri("/webhooks/paddle").insert_header(("Paddle-Signature", stale)).set_payload(body).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(ctx.entitlements().get_by_install_id("abc123").await.unwrap().is_none());
    assert!(ctx.entitlements().get_by_install_id("attacker").await.unwrap().is_none());
}

#[actix_web::test]
async fn signed_garbage_is_a_bad_request() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let reply = send(&app, signed_paddle(&ctx, "{\"event_id\": ")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "invalid_json");
}

#[actix_web::test]
async fn unconfigured_webhook_secret() {
    let _ = env_logger::try_init();
    let mut ctx = TestContext::new();
    ctx.paddle_secret = None;
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let body = paddle_event("evt_05", "transaction.completed", PADDLE_EARLY_BIRD);
    let reply = send(&app, signed_paddle(&ctx, &body)).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.error_code(), "server_misconfigured");
}

#[actix_web::test]
async fn creem_checkout_for_an_installation() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let body = json!({
        "id": "evt_creem_01",
        "eventType": "checkout.completed",
        "created_at": 1_700_000_000_000i64,
        "object": {
            "id": "ch_01",
            "object": "checkout",
            "product": { "id": CREEM_EARLY_BIRD },
            "metadata": { "installId": "abc123" }
        }
    })
    .to_string();
    let req = TestRequest::post()
        .uri("/webhooks/creem")
        .insert_header(("creem-signature", creem_signature(&body)))
        .set_payload(body.clone())
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"ok": true}));
    let record = ctx.entitlements().get_by_install_id("abc123").await.unwrap().unwrap();
    assert_eq!(record.tier, Tier::EarlyBird);
    assert_eq!(record.price_id, CREEM_EARLY_BIRD);
    assert_eq!(ctx.entitlements().get_early_bird_sold().await.unwrap(), 1);

    let req = TestRequest::post()
        .uri("/webhooks/creem")
        .insert_header(("creem-signature", "00".repeat(32)))
        .set_payload(body)
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}
