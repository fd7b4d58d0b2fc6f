mod support;

use std::sync::atomic::Ordering;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use support::TestApp;

fn payload(email: &str, guests: i64, sms: bool) -> Value {
    let phone = sms.then_some("+15550100");
    json!({
        "first_name": "Jane",
        "last_name": "Doe",
        "email": email,
        "phone": phone,
        "sms_opt_in": sms,
        "guest_count": guests,
        "lead_interest": false
    })
}

#[tokio::test]
async fn health_returns_ok() {
    let app = TestApp::new();
    let (status, _) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn register_returns_created_and_sends_confirmations() {
    let app = TestApp::new();
    let project = app.seed_project(5).await;

    let (status, body) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", project),
            &payload("jane@example.com", 2, true),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "registered");
    assert_eq!(body["guest_count"], 2);
    assert_eq!(body["party_size"], 3);
    assert_eq!(body["project_title"], "Food Pantry Sort");

    app.drain_notifications().await;
    assert_eq!(app.emails.load(Ordering::SeqCst), 1);
    assert_eq!(app.texts.load(Ordering::SeqCst), 1);

    let (status, overview) = app.get(&format!("/api/v1/projects/{}", project)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["committed"], 3);
    assert_eq!(overview["remaining"], 2);
}

#[tokio::test]
async fn sms_is_skipped_without_opt_in() {
    let app = TestApp::new();
    let project = app.seed_project(5).await;

    let (status, _) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", project),
            &payload("nosms@example.com", 0, false),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.drain_notifications().await;
    assert_eq!(app.emails.load(Ordering::SeqCst), 1);
    assert_eq!(app.texts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn business_rule_rejections_map_to_statuses() {
    let app = TestApp::new();
    let first = app.seed_project(3).await;
    let second = app.seed_project(3).await;

    let (status, _) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", first),
            &payload("a@example.com", 1, false),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // 同一项目重复报名
    let (status, body) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", first),
            &payload("a@example.com", 0, false),
        )
        .await;
    assert_eq!(status, StatusCode::ALREADY_REPORTED);
    assert_eq!(body["code"], "ALREADY_REGISTERED");

    // 已报名其他项目
    let (status, body) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", second),
            &payload("a@example.com", 0, false),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "REGISTERED_ELSEWHERE");

    // 剩余 1 个名额，请求 2 个
    let (status, body) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", first),
            &payload("b@example.com", 1, false),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "CAPACITY_EXCEEDED");

    let (status, body) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", first),
            &payload("c@example.com", -1, false),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", uuid::Uuid::new_v4()),
            &payload("d@example.com", 0, false),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PROJECT_NOT_FOUND");
}

#[tokio::test]
async fn malformed_email_is_rejected_before_the_ledger() {
    let app = TestApp::new();
    let project = app.seed_project(3).await;

    let (status, body) = app
        .post_json(
            &format!("/api/v1/projects/{}/register", project),
            &payload("not-an-email", 0, false),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(app.store.registrations().await.is_empty());
}

#[tokio::test]
async fn cancel_frees_capacity_and_resume_lookup_follows() {
    let app = TestApp::new();
    let project = app.seed_project(2).await;

    app.post_json(
        &format!("/api/v1/projects/{}/register", project),
        &payload("jane@example.com", 1, false),
    )
    .await;

    let (status, body) = app
        .get("/api/v1/registrations/mine?email=jane@example.com")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project_id"], project.to_string());

    let (status, body) = app
        .post(&format!(
            "/api/v1/projects/{}/cancel?email=jane@example.com",
            project
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = app
        .get("/api/v1/registrations/mine?email=jane@example.com")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NO_ACTIVE_REGISTRATION");

    let (_, overview) = app.get(&format!("/api/v1/projects/{}", project)).await;
    assert_eq!(overview["remaining"], 2);

    // 再次取消没有有效报名
    let (status, body) = app
        .post(&format!(
            "/api/v1/projects/{}/cancel?email=jane@example.com",
            project
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "NO_ACTIVE_REGISTRATION");

    app.drain_notifications().await;
    // 一封确认加一封取消
    assert_eq!(app.emails.load(Ordering::SeqCst), 2);
    assert_eq!(app.store.registrations().await.len(), 1);
}

#[tokio::test]
async fn requests_over_the_burst_are_limited() {
    let app = TestApp::with_rate_limit(0.01, 2);

    let request = || {
        Request::builder()
            .uri("/health")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.router.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    // 其他地址不受影响
    let other = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "198.51.100.1")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(other).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
