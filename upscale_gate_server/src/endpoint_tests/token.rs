use actix_web::{http::StatusCode, test, test::TestRequest, App};
use chrono::Duration;
use upscale_gate_engine::{helpers::TokenVerifier, EndpointLimits};

use super::{
    helpers::{send, TestContext, NOW_SECS, PEER, TOKEN_SECRET},
    mocks::unreachable_upscaler,
};

fn token_request() -> TestRequest {
    TestRequest::post().uri("/api/token").peer_addr(PEER.parse().unwrap())
}

#[actix_web::test]
async fn issue_token_from_header() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = token_request().insert_header(("X-Install-Id", "abc123")).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["expiresAt"], (NOW_SECS + 600) * 1000);
    let token = reply.body["token"].as_str().unwrap();
    assert_eq!(token.split('.').count(), 3);
    let verifier = TokenVerifier::new(Some(upg_common::Secret::new(TOKEN_SECRET.to_string())), ctx.clock.shared());
    let claims = verifier.verify(token, "abc123").unwrap();
    assert_eq!(claims.iid, "abc123");
    assert_eq!(claims.exp - claims.iat, 600);
}

#[actix_web::test]
async fn issue_token_from_json_body() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = token_request().set_json(serde_json::json!({"installId": "ext-install-42"})).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body["token"].is_string());
}

#[actix_web::test]
async fn missing_install_id() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let reply = send(&app, token_request().to_request()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "missing_install_id");

    let req = token_request().set_json(serde_json::json!({"installId": "  "})).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "missing_install_id");
}

#[actix_web::test]
async fn malformed_requests() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = token_request().insert_header(("Content-Type", "application/json")).set_payload("{not json").to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "invalid_json");

    let req = token_request().insert_header(("X-Install-Id", "no spaces allowed")).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "invalid_install_id");
}

#[actix_web::test]
async fn unconfigured_secret_is_a_server_error() {
    let _ = env_logger::try_init();
    let mut ctx = TestContext::new();
    ctx.token_secret = None;
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = token_request().insert_header(("X-Install-Id", "abc123")).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.error_code(), "server_misconfigured");
}

#[actix_web::test]
async fn token_requests_are_rate_limited() {
    let _ = env_logger::try_init();
    let mut ctx = TestContext::new();
    ctx.options.token_limits = EndpointLimits::new(2, 100);
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let request = || token_request().insert_header(("X-Install-Id", "abc123")).to_request();
    assert_eq!(send(&app, request()).await.status, StatusCode::OK);
    assert_eq!(send(&app, request()).await.status, StatusCode::OK);
    let reply = send(&app, request()).await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.error_code(), "rate_limited");
    assert_eq!(reply.body["resetAt"], (NOW_SECS + 60) * 1000);

    // Other installations behind the same address have their own budget
    let req = token_request().insert_header(("X-Install-Id", "other-install")).to_request();
    assert_eq!(send(&app, req).await.status, StatusCode::OK);

    ctx.clock.advance(Duration::seconds(61));
    assert_eq!(send(&app, request()).await.status, StatusCode::OK);
}
