//! API regression tests.
//!
//! Drives the full router (accounts, catalog, installs, uninstalls, events)
//! against an in-memory store and the in-memory deployment driver.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use seedling_api::{ApiState, PasswordHasher, TokenIssuer, build_router};
use seedling_core::Catalog;
use seedling_driver::InMemoryDriver;
use seedling_orchestrator::{Orchestrator, OrchestratorSettings};
use seedling_state::StateStore;
use serde_json::{Value, json};
use tower::ServiceExt;

const FIXTURE_CATALOG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../tests/fixtures/catalog.json");

struct Harness {
    router: Router,
    orchestrator: Arc<Orchestrator>,
    driver: Arc<InMemoryDriver>,
}

fn harness(blocking: bool) -> Harness {
    let catalog = Catalog::from_file(Path::new(FIXTURE_CATALOG)).unwrap();
    let driver = Arc::new(InMemoryDriver::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(catalog),
        StateStore::open_in_memory().unwrap(),
        driver.clone(),
        OrchestratorSettings {
            access_host: "apps.example.com".to_string(),
            ..OrchestratorSettings::default()
        },
    ));
    let state = ApiState::new(
        orchestrator.clone(),
        TokenIssuer::new("test-secret", Duration::from_secs(3600)),
        // Low cost keeps registration fast in tests.
        PasswordHasher::new(10),
    )
    .with_blocking_operations(blocking);

    Harness {
        router: build_router(state),
        orchestrator,
        driver,
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Register `username` and return a bearer token.
async fn register(router: &Router, username: &str) -> String {
    let email = format!("{username}@example.com");
    let (status, _) = send(
        router,
        post(
            "/v1/users",
            None,
            json!({"username": username, "email": email, "password": "correct horse"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        router,
        post(
            "/v1/users/login",
            None,
            json!({"email": email, "password": "correct horse"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

async fn install(router: &Router, token: &str, service: &str) -> (StatusCode, Value) {
    send(
        router,
        post("/v1/services/install", Some(token), json!({"name": service})),
    )
    .await
}

async fn uninstall(router: &Router, token: &str, service: &str) -> (StatusCode, Value) {
    send(
        router,
        post(&format!("/v1/services/uninstall/{service}"), Some(token), json!({})),
    )
    .await
}

// ── Accounts ───────────────────────────────────────────────────────

#[tokio::test]
async fn liveness_needs_no_token() {
    let h = harness(true);
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, _) = send(&h.router, req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn register_login_and_profile() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;

    let (status, body) = send(&h.router, get("/v1/users", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["username"], "alice");
    assert_eq!(body["data"]["email"], "alice@example.com");
    assert!(body["data"].get("password_hash").is_none());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let h = harness(true);
    register(&h.router, "alice").await;

    let (status, body) = send(
        &h.router,
        post(
            "/v1/users",
            None,
            json!({"username": "alice", "email": "other@example.com", "password": "password1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn invalid_registration_is_rejected() {
    let h = harness(true);
    let (status, _) = send(
        &h.router,
        post(
            "/v1/users",
            None,
            json!({"username": "Not_A_Label", "email": "x@example.com", "password": "password1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let h = harness(true);
    register(&h.router, "alice").await;

    let (status, body) = send(
        &h.router,
        post(
            "/v1/users/login",
            None,
            json!({"email": "alice@example.com", "password": "wrong password"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let h = harness(true);

    let req = Request::builder()
        .uri("/v1/services/installed")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.router, get("/v1/services/installed", "not.a.token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let foreign = TokenIssuer::new("other-secret", Duration::from_secs(60));
    let user = seedling_state::UserRecord {
        id: 1,
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        first_name: String::new(),
        last_name: String::new(),
        password_hash: String::new(),
        created_at: 0,
    };
    let token = foreign.issue(&user).unwrap();
    let (status, _) = send(&h.router, get("/v1/services/installed", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Catalog ────────────────────────────────────────────────────────

#[tokio::test]
async fn catalog_listing_marks_installed_services() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;

    let (status, body) = send(&h.router, get("/v1/services/info", &token)).await;
    assert_eq!(status, StatusCode::OK);
    let services = body["data"].as_array().unwrap();
    assert_eq!(services.len(), 3);
    assert_eq!(services[0]["key"], "wordpress");
    assert_eq!(services[0]["links"][0]["name"], "Documentation");
    assert!(services.iter().all(|s| s["is_installed"] == false));

    install(&h.router, &token, "wordpress").await;

    let (_, body) = send(&h.router, get("/v1/services/info/wordpress", &token)).await;
    assert_eq!(body["data"]["is_installed"], true);
    let (_, body) = send(&h.router, get("/v1/services/info/redis", &token)).await;
    assert_eq!(body["data"]["is_installed"], false);
}

#[tokio::test]
async fn unknown_service_info_is_not_found() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;
    let (status, _) = send(&h.router, get("/v1/services/info/nope", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Installs ───────────────────────────────────────────────────────

#[tokio::test]
async fn blocking_install_returns_final_record() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;

    let (status, body) = install(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "installed");
    assert_eq!(body["data"]["namespace"], "seedling-alice");
    assert_eq!(body["data"]["release_name"], "wordpress");
    assert_eq!(body["data"]["port"], 30000);
    assert_eq!(body["data"]["live_url"], "apps.example.com:30000");
    assert!(h.driver.has_release("seedling-alice", "wordpress"));

    let (status, body) = send(&h.router, get("/v1/services/installed/wordpress", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "WordPress");
}

#[tokio::test]
async fn background_install_is_accepted_then_completes() {
    let h = harness(false);
    let token = register(&h.router, "alice").await;
    h.driver.set_install_delay(Duration::from_millis(50));

    let (status, body) = install(&h.router, &token, "redis").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "installing");
    assert_eq!(body["data"]["release_name"], "alice-redis");

    let mut status = Value::Null;
    for _ in 0..100 {
        let (_, body) = send(&h.router, get("/v1/services/installed/redis", &token)).await;
        status = body["data"]["status"].clone();
        if status == "installed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "installed");
    assert!(h.driver.has_release("seedling-alice", "alice-redis"));
}

#[tokio::test]
async fn second_install_of_same_service_conflicts() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;

    let (status, _) = install(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = install(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["ok"], false);
    assert_eq!(h.driver.install_calls(), 1);
}

#[tokio::test]
async fn install_while_in_flight_conflicts() {
    let h = harness(false);
    let token = register(&h.router, "alice").await;
    h.driver.set_install_delay(Duration::from_millis(300));

    let (status, _) = install(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = install(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = uninstall(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn install_validation_errors() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;

    let (status, _) = install(&h.router, &token, "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = install(&h.router, &token, "nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // `key` is accepted in place of `name`.
    let (status, _) = send(
        &h.router,
        post("/v1/services/install", Some(&token), json!({"key": "uptime-kuma"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn driver_failure_is_bad_gateway_and_leaves_nothing_behind() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;
    h.driver.fail_installs(Some("chart not reachable"));

    let (status, body) = install(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("chart not reachable"));

    let (status, _) = send(&h.router, get("/v1/services/installed/wordpress", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(h.orchestrator.ports().available(), 3);

    h.driver.fail_installs(None);
    let (status, body) = install(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["port"], 30000);
}

#[tokio::test]
async fn port_exhaustion_is_service_unavailable() {
    let h = harness(true);
    for user in ["alice", "bob", "carol"] {
        let token = register(&h.router, user).await;
        let (status, _) = install(&h.router, &token, "wordpress").await;
        assert_eq!(status, StatusCode::OK);
    }

    let token = register(&h.router, "dave").await;
    let (status, _) = install(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // Services without a port still install.
    let (status, _) = install(&h.router, &token, "uptime-kuma").await;
    assert_eq!(status, StatusCode::OK);
}

// ── Uninstalls ─────────────────────────────────────────────────────

#[tokio::test]
async fn uninstall_removes_record_and_release() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;
    install(&h.router, &token, "wordpress").await;

    let (status, _) = uninstall(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.driver.has_release("seedling-alice", "wordpress"));

    let (status, _) = send(&h.router, get("/v1/services/installed/wordpress", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = uninstall(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_uninstall_marks_errored_and_can_be_retried() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;
    install(&h.router, &token, "wordpress").await;

    h.driver.fail_uninstalls(Some("cluster unreachable"));
    let (status, _) = uninstall(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, body) = send(&h.router, get("/v1/services/installed/wordpress", &token)).await;
    assert_eq!(body["data"]["status"], "errored");
    assert!(
        body["data"]["last_error"]
            .as_str()
            .unwrap()
            .contains("cluster unreachable")
    );

    h.driver.fail_uninstalls(None);
    let (status, _) = uninstall(&h.router, &token, "wordpress").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn tenants_are_isolated_and_ports_are_reused() {
    let h = harness(true);
    let alice = register(&h.router, "alice").await;
    let bob = register(&h.router, "bob").await;

    let (_, body) = install(&h.router, &alice, "wordpress").await;
    assert_eq!(body["data"]["port"], 30000);
    let (_, body) = install(&h.router, &bob, "wordpress").await;
    assert_eq!(body["data"]["port"], 30001);
    assert_eq!(body["data"]["namespace"], "seedling-bob");

    // Bob cannot see or remove Alice's installation.
    let (_, body) = send(&h.router, get("/v1/services/installed", &bob)).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["namespace"], "seedling-bob");

    let (status, _) = uninstall(&h.router, &alice, "wordpress").await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.driver.has_release("seedling-bob", "wordpress"));

    let carol = register(&h.router, "carol").await;
    let (_, body) = install(&h.router, &carol, "wordpress").await;
    assert_eq!(body["data"]["port"], 30000);
}

// ── Events ─────────────────────────────────────────────────────────

#[tokio::test]
async fn events_list_lifecycle_newest_first() {
    let h = harness(true);
    let token = register(&h.router, "alice").await;
    let other = register(&h.router, "bob").await;

    install(&h.router, &token, "wordpress").await;
    uninstall(&h.router, &token, "wordpress").await;
    install(&h.router, &other, "redis").await;

    let (status, body) = send(&h.router, get("/v1/events", &token)).await;
    assert_eq!(status, StatusCode::OK);
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["kind"], "uninstalled");
    assert_eq!(events[1]["kind"], "installed");
    assert!(events.iter().all(|e| e["service_key"] == "wordpress"));

    let (_, body) = send(&h.router, get("/v1/events?limit=1", &token)).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
