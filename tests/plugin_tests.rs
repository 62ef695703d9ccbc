//! Plugin bus contract: identity-injecting preprocessors and
//! plugin-namespaced sub-handlers under `/_p/<name>/`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use trellis::{
    HandlerResponse, HandlerType, PluginBus, PreprocessorResult, RequestContext, RequestPlugin,
};

mod common;

/// Reads the session cookie and injects the authenticated identity into
/// the scratch space, without altering control flow.
struct CookieLogin;

impl RequestPlugin for CookieLogin {
    fn name(&self) -> &str {
        "cookie_login"
    }

    fn pre_process(&self, ctx: &mut RequestContext) -> PreprocessorResult {
        let email = ctx
            .request
            .get_cookie("email")
            .map(|v| json!(v))
            .unwrap_or(json!(null));
        ctx.set("email", email);
        PreprocessorResult::Continue
    }
}

#[test]
fn test_preprocessor_injects_identity_from_cookie() {
    let root = HandlerType::page("main", "main")
        .get("/", "index", |ctx| {
            Ok(HandlerResponse::json(
                200,
                json!({ "email": ctx.get("email").cloned() }),
            ))
        })
        .build();
    let mut bus = PluginBus::new();
    bus.register(Arc::new(CookieLogin));
    let dispatcher = common::dispatcher_with_plugins(&root, bus, false);

    let mut req = common::get("/");
    req.cookies.push((Arc::from("email"), "a@example.com".to_string()));
    let resp = dispatcher.dispatch(req);
    assert_eq!(
        resp.body.as_json(),
        Some(&json!({ "email": "a@example.com" }))
    );
}

/// Login plugin exposing its own handler tree under `/_p/auth/`.
struct AuthPlugin;

impl RequestPlugin for AuthPlugin {
    fn name(&self) -> &str {
        "auth"
    }

    fn sub_handler(&self) -> Option<Arc<HandlerType>> {
        Some(
            HandlerType::page("auth", "auth")
                .get("/", "login", |_ctx| {
                    Ok(HandlerResponse::redirect("https://accounts.example.com"))
                })
                .get("/callback", "callback", |ctx| {
                    let code = ctx.request.get_query_param("code").unwrap_or("none");
                    Ok(HandlerResponse::json(200, json!({ "code": code })))
                })
                .build(),
        )
    }
}

#[test]
fn test_plugin_sub_handler_is_reachable_under_plugin_prefix() {
    let root = HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .build();
    let mut bus = PluginBus::new();
    bus.register(Arc::new(AuthPlugin));
    let dispatcher = common::dispatcher_with_plugins(&root, bus, false);

    let resp = dispatcher.dispatch(common::get("/_p/auth/"));
    assert_eq!(resp.status, 302);
    assert_eq!(
        resp.get_header("location"),
        Some("https://accounts.example.com")
    );

    let mut req = common::get("/_p/auth/callback");
    req.query_params.push((Arc::from("code"), "xyz".to_string()));
    let resp = dispatcher.dispatch(req);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_json(), Some(&json!({ "code": "xyz" })));
}

#[test]
fn test_unknown_plugin_name_is_404() {
    let root = HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .on_error(|_ctx, report| {
            HandlerResponse::json(report.status, json!({ "rendered_by": "main" }))
        })
        .build();
    let dispatcher = common::dispatcher_for(&root, false);

    let resp = dispatcher.dispatch(common::get("/_p/ghost/anything"));
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body.as_json().unwrap()["rendered_by"], "main");
}

struct CountingPlugin {
    calls: Arc<AtomicUsize>,
}

impl RequestPlugin for CountingPlugin {
    fn name(&self) -> &str {
        "counter"
    }

    fn pre_process(&self, _ctx: &mut RequestContext) -> PreprocessorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PreprocessorResult::Continue
    }

    fn sub_handler(&self) -> Option<Arc<HandlerType>> {
        Some(
            HandlerType::page("counter", "counter")
                .get("/", "index", |_ctx| {
                    Ok(HandlerResponse::json(200, json!({ "ok": true })))
                })
                .build(),
        )
    }
}

#[test]
fn test_pre_process_runs_exactly_once_per_request() {
    let calls = Arc::new(AtomicUsize::new(0));
    let root = HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .build();
    let mut bus = PluginBus::new();
    bus.register(Arc::new(CountingPlugin {
        calls: Arc::clone(&calls),
    }));
    let dispatcher = common::dispatcher_with_plugins(&root, bus, false);

    let resp = dispatcher.dispatch(common::get("/"));
    assert_eq!(resp.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_plugin_sub_handlers_bypass_the_preprocessor_chain() {
    let calls = Arc::new(AtomicUsize::new(0));
    let root = HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .build();
    let mut bus = PluginBus::new();
    bus.register(Arc::new(CountingPlugin {
        calls: Arc::clone(&calls),
    }));
    let dispatcher = common::dispatcher_with_plugins(&root, bus, false);

    let resp = dispatcher.dispatch(common::get("/_p/counter/"));
    assert_eq!(resp.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

struct ConflictedPlugin;

impl RequestPlugin for ConflictedPlugin {
    fn name(&self) -> &str {
        "conflicted"
    }

    fn sub_handler(&self) -> Option<Arc<HandlerType>> {
        Some(
            HandlerType::page("conflicted", "conflicted")
                .get("/x/", "a", |_ctx| {
                    Ok(HandlerResponse::json(200, json!({})))
                })
                .get("/x", "b", |_ctx| Ok(HandlerResponse::json(200, json!({}))))
                .build(),
        )
    }
}

#[test]
fn test_conflicting_plugin_routes_abort_dispatcher_construction() {
    use trellis::{Dispatcher, MiniJinjaEngine, RouteTable};

    common::setup_runtime();
    let root = HandlerType::page("main", "main")
        .get("/", "index", |_ctx| {
            Ok(HandlerResponse::html(200, "home".to_string()))
        })
        .build();
    let table = Arc::new(RouteTable::compile(&root).unwrap());
    let mut bus = PluginBus::new();
    bus.register(Arc::new(ConflictedPlugin));

    let result = Dispatcher::new(
        table,
        Arc::new(bus),
        Arc::new(MiniJinjaEngine::new()),
        common::test_config(false),
    );
    assert!(result.is_err());
}
