use actix_web::{http::StatusCode, test, test::TestRequest, App};
use chrono::Duration;
use serde_json::json;
use upg_common::Secret;
use upscale_gate_engine::{
    db_types::{EntitlementRecord, Tier},
    helpers::TokenIssuer,
};

use super::{
    helpers::{png_header, send, TestContext, NOW_SECS, PADDLE_EARLY_BIRD, PEER},
    mocks::{unreachable_upscaler, working_upscaler, MockUpscaler},
};
use crate::integrations::replicate::UpstreamError;

const INSTALL_ID: &str = "abc123";

fn upscale_request(ctx: &TestContext) -> TestRequest {
    TestRequest::post()
        .uri("/api/upscale")
        .peer_addr(PEER.parse().unwrap())
        .insert_header(("X-Install-Id", INSTALL_ID))
        .insert_header(("Authorization", format!("Bearer {}", ctx.token_for(INSTALL_ID))))
}

async fn grant_entitlement(ctx: &TestContext, install_id: &str) {
    let record = EntitlementRecord {
        tier: Tier::EarlyBird,
        price_id: PADDLE_EARLY_BIRD.into(),
        install_id: Some(install_id.into()),
        email: None,
        updated_at: NOW_SECS * 1000,
        source_event: "transaction.completed".into(),
        subscription_id: None,
        transaction_id: Some("txn_01".into()),
    };
    ctx.entitlements().save(record).await.unwrap();
}

#[actix_web::test]
async fn upscale_image_url() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(working_upscaler(1)))).await;
    let body = json!({"image": "https://example.com/cat.png", "width": 100, "height": 50});
    let reply = send(&app, upscale_request(&ctx).set_json(body).to_request()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["jobId"], "job-123");
    assert_eq!(reply.body["outputImageUrl"], "https://cdn.example.com/out-x2.png");
    assert_eq!(reply.body["width"], 200);
    assert_eq!(reply.body["height"], 100);
}

#[actix_web::test]
async fn missing_token() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = TestRequest::post()
        .uri("/api/upscale")
        .insert_header(("X-Install-Id", INSTALL_ID))
        .set_json(json!({"image": "https://example.com/cat.png"}))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_code(), "missing_token");
}

#[actix_web::test]
async fn expired_and_forged_tokens_are_told_apart() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let body = json!({"image": "https://example.com/cat.png"});

    let forged = TokenIssuer::new(Some(Secret::new("not-the-server-secret".to_string())), ctx.clock.shared())
        .issue(INSTALL_ID)
        .unwrap()
        .token;
    let req = upscale_request(&ctx)
        .insert_header(("Authorization", format!("Bearer {forged}")))
        .set_json(body.clone())
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_code(), "token_invalid_signature");

    let req = upscale_request(&ctx).set_json(body).to_request();
    ctx.clock.advance(Duration::seconds(601));
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.error_code(), "token_expired");
}

#[actix_web::test]
async fn token_bound_to_another_installation() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = upscale_request(&ctx)
        .insert_header(("X-Install-Id", "someone-else"))
        .set_json(json!({"image": "https://example.com/cat.png"}))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.error_code(), "token_install_mismatch");
}

#[actix_web::test]
async fn fifth_request_in_a_minute_is_rejected() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(working_upscaler(4)))).await;
    let body = json!({"image": "https://example.com/cat.png"});
    for _ in 0..4 {
        let reply = send(&app, upscale_request(&ctx).set_json(body.clone()).to_request()).await;
        assert_eq!(reply.status, StatusCode::OK);
    }
    let reply = send(&app, upscale_request(&ctx).set_json(body).to_request()).await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.error_code(), "rate_limited");
    assert!(reply.body["resetAt"].as_i64().unwrap() > NOW_SECS * 1000);
}

#[actix_web::test]
async fn oversized_upload() {
    let _ = env_logger::try_init();
    let mut ctx = TestContext::new();
    ctx.options.max_upload_bytes = 64;
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = upscale_request(&ctx)
        .uri("/api/upscale?scale=2")
        .insert_header(("Content-Type", "image/png"))
        .set_payload(vec![0u8; 65])
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(reply.error_code(), "payload_too_large");
}

#[actix_web::test]
async fn unsupported_media() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = upscale_request(&ctx).insert_header(("Content-Type", "image/gif")).set_payload("GIF89a").to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(reply.error_code(), "unsupported_media_type");

    let body = json!({"image": "data:image/gif;base64,R0lGODlh"});
    let reply = send(&app, upscale_request(&ctx).set_json(body).to_request()).await;
    assert_eq!(reply.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let reply = send(&app, upscale_request(&ctx).set_json(json!({"scale": 2})).to_request()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "missing_image");

    let body = json!({"image": "https://example.com/cat.png", "scale": 3});
    let reply = send(&app, upscale_request(&ctx).set_json(body).to_request()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "invalid_parameter");
}

#[actix_web::test]
async fn high_scale_needs_an_entitlement() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let body = json!({"image": "https://example.com/cat.png", "scale": 4});
    let reply = send(&app, upscale_request(&ctx).set_json(body).to_request()).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.error_code(), "pro_required");
}

#[actix_web::test]
async fn entitled_installation_gets_high_scale() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    grant_entitlement(&ctx, INSTALL_ID).await;
    let app = test::init_service(App::new().configure(ctx.configure(working_upscaler(1)))).await;
    let body = json!({"image": "https://example.com/cat.png", "scale": 4, "faceEnhance": true});
    let reply = send(&app, upscale_request(&ctx).set_json(body).to_request()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["outputImageUrl"], "https://cdn.example.com/out-x4.png");
    assert!(reply.body["width"].is_null());
}

#[actix_web::test]
async fn upstream_failure_is_a_bad_gateway() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let mut upscaler = MockUpscaler::new();
    upscaler.expect_upscale().times(1).returning(|_| Err(UpstreamError::JobFailed("model crashed".into())));
    let app = test::init_service(App::new().configure(ctx.configure(upscaler))).await;
    let body = json!({"image": "https://example.com/cat.png"});
    let reply = send(&app, upscale_request(&ctx).set_json(body).to_request()).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.error_code(), "upstream_error");
}

#[actix_web::test]
async fn raw_png_upload() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let mut upscaler = MockUpscaler::new();
    upscaler.expect_upscale().times(1).returning(|req| {
        assert!(req.image.starts_with("data:image/png;base64,"));
        assert_eq!(req.scale, 2);
        Ok(crate::integrations::replicate::UpscaleOutput {
            job_id: "job-png".into(),
            output_url: "https://cdn.example.com/png.png".into(),
        })
    });
    let app = test::init_service(App::new().configure(ctx.configure(upscaler))).await;
    let req = upscale_request(&ctx)
        .uri("/api/upscale?scale=2")
        .insert_header(("Content-Type", "image/png"))
        .set_payload(png_header(320, 240))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["jobId"], "job-png");
    assert_eq!(reply.body["width"], 640);
    assert_eq!(reply.body["height"], 480);
}

#[actix_web::test]
async fn multipart_upload() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(working_upscaler(1)))).await;
    let boundary = "upg-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Disposition: form-data; name=\"scale\"\r\n\r\n2\r\n").as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"cat.png\"\r\nContent-Type: \
             image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png_header(10, 20));
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    let req = upscale_request(&ctx)
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={boundary}")))
        .set_payload(body)
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["width"], 20);
    assert_eq!(reply.body["height"], 40);
}
