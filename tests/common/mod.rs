#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;

use trellis::{
    Dispatcher, HandlerType, HeaderVec, MiniJinjaEngine, ParamVec, ParsedRequest, PluginBus,
    RouteTable, RuntimeConfig,
};

/// Ensures the may coroutine runtime is configured only once.
static MAY_INIT: Once = Once::new();

pub fn setup_runtime() {
    MAY_INIT.call_once(|| {
        may::config().set_stack_size(0x8000);
    });
}

/// Runtime config with a fixed default language, independent of the
/// environment the test runs in.
pub fn test_config(debug: bool) -> RuntimeConfig {
    RuntimeConfig {
        stack_size: 0x8000,
        debug,
        address: "127.0.0.1".to_string(),
        port: 0,
        default_language: "en".to_string(),
    }
}

/// Build a dispatcher over `root` with no plugins.
pub fn dispatcher_for(root: &Arc<HandlerType>, debug: bool) -> Dispatcher {
    dispatcher_with_plugins(root, PluginBus::new(), debug)
}

/// Build a dispatcher over `root` with the given plugin bus.
pub fn dispatcher_with_plugins(
    root: &Arc<HandlerType>,
    plugins: PluginBus,
    debug: bool,
) -> Dispatcher {
    setup_runtime();
    let table = Arc::new(RouteTable::compile(root).expect("compile route table"));
    Dispatcher::new(
        table,
        Arc::new(plugins),
        Arc::new(MiniJinjaEngine::new()),
        test_config(debug),
    )
    .expect("build dispatcher")
}

/// A bare request for the given method and path.
pub fn request(method: &str, path: &str) -> ParsedRequest {
    ParsedRequest {
        method: method.to_string(),
        path: path.to_string(),
        headers: HeaderVec::new(),
        cookies: HeaderVec::new(),
        query_params: ParamVec::new(),
        body: None,
    }
}

pub fn get(path: &str) -> ParsedRequest {
    request("GET", path)
}

/// Attach a header (lowercase name) to a request.
pub fn with_header(mut req: ParsedRequest, name: &str, value: &str) -> ParsedRequest {
    req.headers.push((Arc::from(name), value.to_string()));
    req
}
