//! Dispatch behavior: routing, normalization, special paths, the
//! preprocessor chain and locale negotiation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use trellis::{
    spawn_pending, HandlerError, HandlerResponse, HandlerType, PluginBus, PreprocessorResult,
    RequestContext, RequestPlugin,
};

mod common;

use tracing_util::TestTracing;

fn echo_pet(ctx: &mut RequestContext) -> Result<HandlerResponse, HandlerError> {
    let id = ctx
        .request
        .get_path_param("id")
        .unwrap_or("missing")
        .to_string();
    Ok(HandlerResponse::json(200, json!({ "id": id })))
}

fn pets_root() -> Arc<HandlerType> {
    HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "<h1>home</h1>".to_string()))
        })
        .get("/pets/<id>", "get_pet", echo_pet)
        .build()
}

#[test]
fn test_dispatch_routes_to_handler() {
    let _tracing = TestTracing::init();
    let dispatcher = common::dispatcher_for(&pets_root(), false);
    let resp = dispatcher.dispatch(common::get("/pets/12345"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_json(), Some(&json!({ "id": "12345" })));
    assert_eq!(resp.get_header("content-type"), Some("application/json"));
}

#[test]
fn test_trailing_slashes_collapse_to_same_match() {
    let dispatcher = common::dispatcher_for(&pets_root(), false);
    for path in ["/pets/12345", "/pets/12345/", "/pets/12345///"] {
        let resp = dispatcher.dispatch(common::get(path));
        assert_eq!(resp.status, 200, "path {path}");
        assert_eq!(resp.body.as_json(), Some(&json!({ "id": "12345" })));
    }
}

#[test]
fn test_empty_path_is_equivalent_to_root() {
    let dispatcher = common::dispatcher_for(&pets_root(), false);
    let resp = dispatcher.dispatch(common::get(""));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_html(), Some("<h1>home</h1>"));
}

#[test]
fn test_unmatched_path_renders_404_through_root_error_path() {
    let root = HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .on_error(|_ctx, report| {
            HandlerResponse::json(
                report.status,
                json!({ "rendered_by": "main", "message": report.message }),
            )
        })
        .build();
    let dispatcher = common::dispatcher_for(&root, false);
    let resp = dispatcher.dispatch(common::get("/nope"));
    assert_eq!(resp.status, 404);
    let body = resp.body.as_json().unwrap();
    assert_eq!(body["rendered_by"], "main");
}

#[test]
fn test_unsupported_method_is_405() {
    let dispatcher = common::dispatcher_for(&pets_root(), false);
    let resp = dispatcher.dispatch(common::request("PATCH", "/pets/1"));
    assert_eq!(resp.status, 405);
}

struct SyncWriter;

impl RequestPlugin for SyncWriter {
    fn name(&self) -> &str {
        "sync_writer"
    }

    fn pre_process(&self, ctx: &mut RequestContext) -> PreprocessorResult {
        ctx.set("sync_step", json!("done"));
        PreprocessorResult::Continue
    }
}

struct SlowAsyncWriter;

impl RequestPlugin for SlowAsyncWriter {
    fn name(&self) -> &str {
        "slow_async_writer"
    }

    fn pre_process(&self, _ctx: &mut RequestContext) -> PreprocessorResult {
        spawn_pending(|| {
            may::coroutine::sleep(Duration::from_millis(30));
            Ok(vec![("async_step".to_string(), json!("done"))])
        })
    }
}

#[test]
fn test_sync_and_async_preprocessors_finish_before_target() {
    let _tracing = TestTracing::init();
    let root = HandlerType::page("main", "main")
        .get("/", "index", |ctx| {
            // both steps must be visible here, whatever order they finished in
            Ok(HandlerResponse::json(
                200,
                json!({
                    "sync": ctx.get("sync_step").cloned(),
                    "async": ctx.get("async_step").cloned(),
                }),
            ))
        })
        .build();
    let mut bus = PluginBus::new();
    bus.register(Arc::new(SlowAsyncWriter));
    bus.register(Arc::new(SyncWriter));
    let dispatcher = common::dispatcher_with_plugins(&root, bus, false);

    let resp = dispatcher.dispatch(common::get("/"));
    assert_eq!(resp.status, 200);
    assert_eq!(
        resp.body.as_json(),
        Some(&json!({ "sync": "done", "async": "done" }))
    );
}

struct Gatekeeper;

impl RequestPlugin for Gatekeeper {
    fn name(&self) -> &str {
        "gatekeeper"
    }

    fn pre_process(&self, _ctx: &mut RequestContext) -> PreprocessorResult {
        PreprocessorResult::ShortCircuit(HandlerResponse::error(401, "login required"))
    }
}

#[test]
fn test_short_circuit_skips_target_method() {
    static TARGET_RAN: AtomicBool = AtomicBool::new(false);

    let root = HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            TARGET_RAN.store(true, Ordering::SeqCst);
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .build();
    let mut bus = PluginBus::new();
    bus.register(Arc::new(Gatekeeper));
    let dispatcher = common::dispatcher_with_plugins(&root, bus, false);

    let resp = dispatcher.dispatch(common::get("/"));
    assert_eq!(resp.status, 401);
    assert!(!TARGET_RAN.load(Ordering::SeqCst));
}

struct FailingAsync;

impl RequestPlugin for FailingAsync {
    fn name(&self) -> &str {
        "failing_async"
    }

    fn pre_process(&self, _ctx: &mut RequestContext) -> PreprocessorResult {
        spawn_pending(|| Err(HandlerError::status(403, "token rejected")))
    }
}

#[test]
fn test_preprocessor_failure_enters_error_escalation() {
    static TARGET_RAN: AtomicBool = AtomicBool::new(false);

    let root = HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            TARGET_RAN.store(true, Ordering::SeqCst);
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .on_error(|_ctx, report| {
            HandlerResponse::json(report.status, json!({ "rendered_by": "main" }))
        })
        .build();
    let mut bus = PluginBus::new();
    bus.register(Arc::new(FailingAsync));
    let dispatcher = common::dispatcher_with_plugins(&root, bus, false);

    let resp = dispatcher.dispatch(common::get("/"));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body.as_json().unwrap()["rendered_by"], "main");
    assert!(!TARGET_RAN.load(Ordering::SeqCst));
}

#[test]
fn test_debug_interface_dumps_routes() {
    let dispatcher = common::dispatcher_for(&pets_root(), true);
    let resp = dispatcher.dispatch(common::get("/__debug__/routes"));
    assert_eq!(resp.status, 200);
    let routes = resp.body.as_json().unwrap()["routes"].as_array().unwrap().clone();
    assert!(routes.iter().any(|r| r["pattern"] == "/pets/<id>"));
}

#[test]
fn test_debug_interface_disabled_in_production() {
    let dispatcher = common::dispatcher_for(&pets_root(), false);
    let resp = dispatcher.dispatch(common::get("/__debug__/routes"));
    assert_eq!(resp.status, 404);
}

#[test]
fn test_static_interception_serves_namespace_assets() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.css"), "body { margin: 0 }").unwrap();
    let root = HandlerType::page("main", "shop")
        .static_dir(dir.path())
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .build();
    let dispatcher = common::dispatcher_for(&root, false);

    let resp = dispatcher.dispatch(common::get("/static/shop/app.css"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_bytes(), Some(b"body { margin: 0 }".as_ref()));
    assert_eq!(resp.get_header("content-type"), Some("text/css"));
}

#[test]
fn test_static_path_traversal_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let root = HandlerType::page("main", "shop")
        .static_dir(dir.path())
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .build();
    let dispatcher = common::dispatcher_for(&root, false);

    let resp = dispatcher.dispatch(common::get("/static/shop/../Cargo.toml"));
    assert_eq!(resp.status, 403);
}

#[test]
fn test_static_unknown_module_is_404() {
    let dispatcher = common::dispatcher_for(&pets_root(), false);
    let resp = dispatcher.dispatch(common::get("/static/elsewhere/app.css"));
    assert_eq!(resp.status, 404);
}

#[test]
fn test_locale_negotiated_against_page_locales() {
    let root = HandlerType::page("main", "main")
        .locale("de_AT")
        .locale("en")
        .get("/", "index", |ctx| {
            Ok(HandlerResponse::json(
                200,
                json!({ "locale": ctx.request.locale }),
            ))
        })
        .build();
    let dispatcher = common::dispatcher_for(&root, false);

    let req = common::with_header(common::get("/"), "accept-language", "de-AT,de;q=0.8");
    let resp = dispatcher.dispatch(req);
    assert_eq!(resp.body.as_json(), Some(&json!({ "locale": "de_AT" })));

    // no header: the configured default language applies
    let resp = dispatcher.dispatch(common::get("/"));
    assert_eq!(resp.body.as_json(), Some(&json!({ "locale": "en" })));
}

#[test]
fn test_multiple_path_variables_bind_positionally() {
    let root = HandlerType::page("main", "main")
        .get("/users/<user_id>/posts/<post_id>", "post", |ctx| {
            Ok(HandlerResponse::json(
                200,
                json!({
                    "user": ctx.request.get_path_param("user_id"),
                    "post": ctx.request.get_path_param("post_id"),
                }),
            ))
        })
        .build();
    let dispatcher = common::dispatcher_for(&root, false);
    let resp = dispatcher.dispatch(common::get("/users/abc-123/posts/intro"));
    assert_eq!(
        resp.body.as_json(),
        Some(&json!({ "user": "abc-123", "post": "intro" }))
    );
}

#[test]
fn test_request_body_reaches_handler() {
    let root = HandlerType::page("main", "main")
        .post("/items", "create", |ctx| {
            let name = ctx
                .request
                .body
                .as_ref()
                .and_then(|b| b.get("name"))
                .cloned()
                .unwrap_or(json!(null));
            Ok(HandlerResponse::json(201, json!({ "created": name })))
        })
        .build();
    let dispatcher = common::dispatcher_for(&root, false);

    let mut req = common::request("POST", "/items");
    req.body = Some(json!({ "name": "Bella" }));
    let resp = dispatcher.dispatch(req);
    assert_eq!(resp.status, 201);
    assert_eq!(resp.body.as_json(), Some(&json!({ "created": "Bella" })));
}
