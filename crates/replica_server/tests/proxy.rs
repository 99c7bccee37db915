//! The self-healing preview proxy against a local upstream.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use replica_llm::ScriptedGenerator;
use replica_sandbox::{Environment, MockProvider};
use replica_server::ProxyOutcome;
use replica_store::{DurableRecord, DurableStore};

use common::{eventually, fast_config, harness, healthy_provider, spawn_upstream, Harness, StaticCapture};

async fn app_upstream() -> String {
    let router = Router::new()
        .route(
            "/",
            get(|| async { Html(r#"<html><script src="/_next/static/main.js"></script></html>"#) }),
        )
        .route(
            "/_next/static/main.js",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/javascript")],
                    "import('/_next/static/chunk.js')",
                )
            }),
        )
        .route("/styles.css", get(|| async { ([(header::CONTENT_TYPE, "text/css")], "a{}") }))
        .route(
            "/login",
            get(|| async { (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, "/welcome")]).into_response() }),
        )
        .route("/echo", get(|q: axum::extract::RawQuery| async move { q.0.unwrap_or_default() }))
        .route("/broken", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Failed to compile") }));
    spawn_upstream(router).await
}

fn build(provider: MockProvider) -> Harness {
    let generator = ScriptedGenerator::new();
    harness(
        fast_config(),
        provider,
        generator.clone(),
        Arc::new(StaticCapture { snapshots: 1 }),
        Arc::new(generator),
    )
}

async fn seed(h: &Harness, id: &str) {
    h.store
        .put_artifact(id, "app/page.tsx", "export default function Home() { return null }")
        .await
        .unwrap();
    h.store
        .put_record(&DurableRecord::new(id, "https://a.dev", format!("/api/sandbox/{}/", id)).with_file_count(1))
        .await
        .unwrap();
}

fn environment(id: &str, base_url: &str, age_secs: i64) -> Environment {
    Environment {
        session_id: id.to_string(),
        handle: format!("old-{}", id),
        base_url: base_url.to_string(),
        project_dir: "/home/mock/project".to_string(),
        created_at: Utc::now() - chrono::Duration::seconds(age_secs),
    }
}

#[tokio::test]
async fn test_stale_environment_is_recreated_once() {
    let upstream = app_upstream().await;
    let provider = healthy_provider(&upstream).with_create_delay(Duration::from_millis(200));
    let h = build(provider.clone());
    seed(&h, "s1").await;
    h.engine.environments().adopt(environment("s1", &upstream, 700));

    let proxy = h.engine.preview_proxy().clone();
    let (a, b, c) = tokio::join!(
        proxy.proxy("s1", "", None),
        proxy.proxy("s1", "", None),
        proxy.proxy("s1", "about", None)
    );
    for response in [&a, &b, &c] {
        assert_eq!(response.outcome, ProxyOutcome::Interim);
        assert_eq!(response.status, 200);
        assert!(response.text().contains(r#"http-equiv="refresh""#));
    }

    let engine = h.engine.clone();
    assert!(eventually(move || engine.environments().live("s1").is_some()).await);
    assert_eq!(provider.count("create"), 1);
    assert_eq!(
        provider.file("mock-1", "/home/mock/project/app/page.tsx").as_deref(),
        Some("export default function Home() { return null }")
    );

    let page = h.engine.proxy("s1", "", None).await;
    assert_eq!(page.outcome, ProxyOutcome::Forwarded);
    assert!(page
        .text()
        .contains(r#"<script src="/api/sandbox/s1/_next/static/main.js">"#));
}

#[tokio::test]
async fn test_forwarding_rewrites_and_relays() {
    let upstream = app_upstream().await;
    let h = build(healthy_provider(&upstream));
    h.engine.environments().adopt(environment("s1", &upstream, 0));

    let script = h.engine.proxy("s1", "_next/static/main.js", None).await;
    assert_eq!(script.text(), "import('/api/sandbox/s1/_next/static/chunk.js')");

    let css = h.engine.proxy("s1", "styles.css", None).await;
    assert_eq!(css.header("content-type"), Some("text/css"));
    assert_eq!(css.text(), "a{}");

    let redirect = h.engine.proxy("s1", "login", None).await;
    assert_eq!(redirect.status, 307);
    assert_eq!(redirect.header("location"), Some("/api/sandbox/s1/welcome"));

    let echo = h.engine.proxy("s1", "echo", Some("a=1&b=2")).await;
    assert_eq!(echo.text(), "a=1&b=2");

    // Application errors pass through untouched
    let broken = h.engine.proxy("s1", "broken", None).await;
    assert_eq!(broken.outcome, ProxyOutcome::Forwarded);
    assert_eq!(broken.status, 500);
    assert_eq!(h.engine.preview_proxy().failure_count("s1"), 0);
}

#[tokio::test]
async fn test_gateway_error_triggers_recreation() {
    let gateway = spawn_upstream(Router::new().route("/", get(|| async { StatusCode::BAD_GATEWAY }))).await;
    let app = app_upstream().await;
    let provider = healthy_provider(&app);
    let h = build(provider.clone());
    seed(&h, "s1").await;
    h.engine.environments().adopt(environment("s1", &gateway, 0));

    let response = h.engine.proxy("s1", "", None).await;
    assert_eq!(response.outcome, ProxyOutcome::Interim);
    assert_ne!(response.status, 502);

    let engine = h.engine.clone();
    assert!(eventually(move || engine.environments().live("s1").is_some_and(|env| env.handle == "mock-1")).await);
    assert_eq!(provider.count("create"), 1);
}

#[tokio::test]
async fn test_unknown_id_is_gone() {
    let h = build(MockProvider::new());

    let first = h.engine.proxy("ghost", "", None).await;
    assert_eq!(first.outcome, ProxyOutcome::Interim);

    let proxy = h.engine.preview_proxy().clone();
    assert!(eventually(move || proxy.is_failed("ghost")).await);

    let gone = h.engine.proxy("ghost", "", None).await;
    assert_eq!(gone.outcome, ProxyOutcome::Gone);
    assert_eq!(gone.status, 410);
    assert_eq!(h.provider.count("create"), 0);
}

#[tokio::test]
async fn test_repeated_recreation_failures_give_up() {
    let h = build(MockProvider::new().simulate_create_failure("quota exceeded"));
    seed(&h, "s1").await;
    let proxy = h.engine.preview_proxy().clone();

    for expected in 1..=2 {
        let response = proxy.proxy("s1", "", None).await;
        assert_eq!(response.outcome, ProxyOutcome::Interim);
        let p = proxy.clone();
        assert!(eventually(move || !p.is_recreating("s1") && p.failure_count("s1") == expected).await);
    }

    assert!(proxy.is_failed("s1"));
    let gone = proxy.proxy("s1", "", None).await;
    assert_eq!(gone.status, 410);
    assert_eq!(h.provider.count("create"), 2);
}

#[tokio::test]
async fn test_running_pipeline_is_not_recreated() {
    let h = build(MockProvider::new());
    let _sink = h.engine.registry().create("s2", "10.0.0.1", "https://a.dev");

    let response = h.engine.proxy("s2", "", None).await;
    assert_eq!(response.outcome, ProxyOutcome::Interim);
    assert!(!h.engine.preview_proxy().is_recreating("s2"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.provider.count("create"), 0);
}

#[tokio::test]
async fn test_gateway_error_during_pipeline_keeps_environment() {
    let gateway = spawn_upstream(Router::new().route("/", get(|| async { StatusCode::BAD_GATEWAY }))).await;
    let app = app_upstream().await;
    let provider = healthy_provider(&app);
    let h = build(provider.clone());
    let sink = h.engine.registry().create("s3", "10.0.0.1", "https://a.dev");
    h.engine.environments().adopt(environment("s3", &gateway, 0));

    let during = h.engine.proxy("s3", "", None).await;
    assert_eq!(during.outcome, ProxyOutcome::Interim);
    assert!(!h.engine.preview_proxy().is_failed("s3"));
    assert!(!h.engine.preview_proxy().is_recreating("s3"));
    assert!(h.engine.environments().live("s3").is_some_and(|env| env.handle == "old-s3"));

    seed(&h, "s3").await;
    sink.done("/api/sandbox/s3/", Vec::new());
    h.engine.registry().remove("s3");

    let after = h.engine.proxy("s3", "", None).await;
    assert_eq!(after.outcome, ProxyOutcome::Interim);
    let engine = h.engine.clone();
    assert!(eventually(move || engine.environments().live("s3").is_some_and(|env| env.handle == "mock-1")).await);
    assert!(!h.engine.preview_proxy().is_failed("s3"));
    assert_eq!(provider.count("create"), 1);
}

#[tokio::test]
async fn test_missing_record_of_known_session_is_retryable() {
    let h = build(MockProvider::new());
    let sink = h.engine.registry().create("s4", "10.0.0.1", "https://a.dev");
    sink.fail("upload failed");

    let response = h.engine.proxy("s4", "", None).await;
    assert_eq!(response.outcome, ProxyOutcome::Interim);

    let proxy = h.engine.preview_proxy().clone();
    assert!(eventually(move || !proxy.is_recreating("s4") && proxy.failure_count("s4") == 1).await);
    assert!(!h.engine.preview_proxy().is_failed("s4"));
    assert_eq!(h.provider.count("create"), 0);
}
