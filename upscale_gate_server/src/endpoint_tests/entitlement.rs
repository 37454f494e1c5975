use actix_web::{cookie::Cookie, http::StatusCode, test, test::TestRequest, App};
use upscale_gate_engine::{
    db_types::{EntitlementRecord, Tier},
    entitlement_api::EARLY_BIRD_SOLD_KEY,
};

use super::{
    helpers::{send, TestContext, NOW_SECS, PADDLE_EARLY_BIRD, PADDLE_STANDARD},
    mocks::unreachable_upscaler,
};

fn standard_record(install_id: Option<&str>, email: Option<&str>) -> EntitlementRecord {
    EntitlementRecord {
        tier: Tier::Standard,
        price_id: PADDLE_STANDARD.into(),
        install_id: install_id.map(String::from),
        email: email.map(String::from),
        updated_at: NOW_SECS * 1000,
        source_event: "transaction.completed".into(),
        subscription_id: None,
        transaction_id: Some("txn_77".into()),
    }
}

#[actix_web::test]
async fn new_installations_get_an_id_cookie() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let reply = send(&app, TestRequest::get().uri("/api/entitlement").to_request()).await;
    assert_eq!(reply.status, StatusCode::OK);
    let install_id = reply.body["installId"].as_str().unwrap().to_string();
    assert_eq!(install_id.len(), 32);
    assert!(reply.body["entitlement"].is_null());
    assert_eq!(reply.body["earlyBirdSold"], 0);
    assert_eq!(reply.body["earlyBirdCap"], 50);
    assert_eq!(reply.body["currentTier"], "early_bird");
    assert_eq!(reply.body["prices"]["earlyBirdPriceId"], PADDLE_EARLY_BIRD);
    assert_eq!(reply.body["prices"]["standardPriceId"], PADDLE_STANDARD);

    let cookie = reply.headers.get("set-cookie").unwrap().to_str().unwrap();
    let cookie = Cookie::parse(cookie).unwrap();
    assert_eq!(cookie.name(), "install_id");
    assert_eq!(cookie.value(), install_id);
    assert_eq!(cookie.http_only(), Some(true));

    // The browser sends the cookie back, and the id sticks
    let req = TestRequest::get().uri("/api/entitlement").cookie(Cookie::new("install_id", install_id.clone())).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.body["installId"], install_id.as_str());
    assert!(reply.headers.get("set-cookie").is_none());
}

#[actix_web::test]
async fn lookup_by_header_then_email() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    let api = ctx.entitlements();
    api.save(standard_record(Some("abc123"), None)).await.unwrap();
    api.save(standard_record(None, Some("Paid@Example.com"))).await.unwrap();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;

    let req = TestRequest::get().uri("/api/entitlement").insert_header(("X-Install-Id", "abc123")).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["installId"], "abc123");
    assert_eq!(reply.body["entitlement"]["tier"], "standard");
    assert!(reply.headers.get("set-cookie").is_none());

    let req = TestRequest::get()
        .uri("/api/entitlement?email=paid%40example.com")
        .insert_header(("X-Install-Id", "not-paid-yet"))
        .to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.body["entitlement"]["email"], "paid@example.com");

    let req = TestRequest::get().uri("/api/entitlement").insert_header(("X-Install-Id", "bad id!")).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error_code(), "invalid_install_id");
}

#[actix_web::test]
async fn sold_out_early_bird_offers_standard() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    ctx.entitlements().increment_early_bird_sold(50).await.unwrap();
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = TestRequest::get().uri("/api/entitlement").insert_header(("X-Install-Id", "abc123")).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.body["earlyBirdSold"], 50);
    assert_eq!(reply.body["currentTier"], "standard");
}

#[actix_web::test]
async fn unreadable_counter_reads_as_zero() {
    let _ = env_logger::try_init();
    let ctx = TestContext::new();
    ctx.store.set_counter_raw(EARLY_BIRD_SOLD_KEY, "not-a-number");
    let app = test::init_service(App::new().configure(ctx.configure(unreachable_upscaler()))).await;
    let req = TestRequest::get().uri("/api/entitlement").insert_header(("X-Install-Id", "abc123")).to_request();
    let reply = send(&app, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["earlyBirdSold"], 0);
    assert_eq!(reply.body["currentTier"], "early_bird");
}
