//! In-process dispatch through the full pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::json;

use radix_gateway::cache::{CachedEventHandler, HandlerCacheOptions, MemoryStorage};
use radix_gateway::config::parse_config;
use radix_gateway::http::{handler_fn, App, AppOptions, Body, Event, SharedHandler};
use radix_gateway::lifecycle::build_app;
use radix_gateway::routing::{MethodRouter, MethodRouterOptions};

fn named(name: &'static str) -> SharedHandler {
    handler_fn(move |event| {
        Box::pin(async move {
            let mut params: Vec<_> = event.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            params.sort();
            Ok(Some(Body::text(format!("{name} [{}]", params.join(",")))))
        })
    })
}

fn app_with(router: MethodRouter) -> App {
    let mut app = App::new(AppOptions::default());
    app.use_handler(Arc::new(router));
    app
}

fn preemptive() -> MethodRouter {
    MethodRouter::new(MethodRouterOptions {
        preemptive: true,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_static_segment_beats_placeholder() {
    let mut router = preemptive();
    router.get("/a/:id", named("H1")).get("/a/static", named("H2"));
    let app = app_with(router);

    let response = app.handle(Event::new(Method::GET, "/a/static")).await;
    assert_eq!(response.text(), "H2 []");

    let response = app.handle(Event::new(Method::GET, "/a/7")).await;
    assert_eq!(response.text(), "H1 [id=7]");
}

#[tokio::test]
async fn test_wrong_method_is_405() {
    let mut router = preemptive();
    router.post(
        "/items",
        handler_fn(|event| {
            Box::pin(async move {
                event.set_status(StatusCode::CREATED);
                Ok(Some(Body::Json(json!({"ok": true}))))
            })
        }),
    );
    let app = app_with(router);

    let response = app.handle(Event::new(Method::POST, "/items")).await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json().unwrap(), json!({"ok": true}));

    let response = app.handle(Event::new(Method::DELETE, "/items")).await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    let body = response.json().unwrap();
    assert_eq!(body["statusCode"], 405);
    assert_eq!(body["message"], "Method DELETE is not allowed on this route.");
}

#[tokio::test]
async fn test_unregistered_path_is_404() {
    let mut router = preemptive();
    router.get("/a", named("A"));
    let app = app_with(router);

    let response = app.handle(Event::new(Method::GET, "/nope")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let body = response.json().unwrap();
    assert_eq!(body["message"], "Cannot find any route matching /nope.");
    assert_eq!(response.header("cache-control"), Some("no-cache"));
}

#[tokio::test]
async fn test_cached_route_serves_stale_then_refreshes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = handler_fn(move |_event| {
        let counter = counter.clone();
        Box::pin(async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Some(Body::text(format!("render {n}"))))
        })
    });

    let mut options = HandlerCacheOptions::default();
    options.cache.max_age = 1;
    options.cache.swr = true;
    let cached = CachedEventHandler::new(handler, options, Arc::new(MemoryStorage::new()));

    let mut router = preemptive();
    router.get("/page", Arc::new(cached));
    let app = app_with(router);

    let first = app.handle(Event::new(Method::GET, "/page")).await;
    assert_eq!(first.text(), "render 1");
    let etag = first.header("etag").unwrap().to_string();

    let again = app.handle(Event::new(Method::GET, "/page")).await;
    assert_eq!(again.text(), "render 1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let revalidated = app
        .handle(Event::new(Method::GET, "/page").with_header("if-none-match", &etag))
        .await;
    assert_eq!(revalidated.status, StatusCode::NOT_MODIFIED);
    assert!(revalidated.body.is_empty());

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let stale = app.handle(Event::new(Method::GET, "/page")).await;
    assert_eq!(stale.text(), "render 1");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let fresh = app.handle(Event::new(Method::GET, "/page")).await;
    assert_eq!(fresh.text(), "render 2");
}

#[tokio::test]
async fn test_configured_gateway_layers() {
    let dir = std::env::temp_dir().join(format!("radix-gateway-dispatch-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("robots.txt"), "User-agent: *").unwrap();

    let config = parse_config(&format!(
        r#"
        [assets]
        enabled = true
        dir = "{}"
        mount = "/static"

        [[routes]]
        path = "/hello/:name"
        methods = ["GET"]
        body = "hello {{name}}"

        [route_rules."/hello/**"]
        headers = {{ "x-powered-by" = "radix" }}

        [route_rules."/old/**"]
        redirect = {{ to = "/new/**", status_code = 301 }}
        "#,
        dir.display().to_string().replace('\\', "/")
    ))
    .unwrap();
    let app = build_app(&config, Arc::new(MemoryStorage::new())).unwrap();
    assert_eq!(app.layers().len(), 3);

    let response = app.handle(Event::new(Method::GET, "/hello/ada")).await;
    assert_eq!(response.text(), "hello ada");
    assert_eq!(response.header("x-powered-by"), Some("radix"));

    let response = app.handle(Event::new(Method::GET, "/old/post/1?x=1")).await;
    assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.header("location"), Some("/new/post/1?x=1"));

    let response = app.handle(Event::new(Method::GET, "/static/robots.txt")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "User-agent: *");

    let resolved = app.resolve("/static/robots.txt").await.unwrap();
    assert_eq!(resolved.route, "/static/robots.txt");
}
