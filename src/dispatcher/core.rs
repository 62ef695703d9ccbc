use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Instant;

use http::Method;
use serde::Serialize;
use serde_json::{json, Value};
use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use crate::context::{RequestContext, RequestDescriptor};
use crate::handler::HandlerType;
use crate::ids::RequestId;
use crate::plugins::{PluginBus, PreprocessorResult};
use crate::router::{
    normalize_request_path, CompileError, ParamVec, Route, RouteMatch, RouteTable,
    SUPPORTED_VERBS,
};
use crate::runtime_config::RuntimeConfig;
use crate::server::request::ParsedRequest;
use crate::server::response::status_reason;
use crate::static_files::{content_type, AssetError, StaticResolver};
use crate::templating::TemplateEngine;

/// Maximum inline headers/cookies before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header/cookie storage for the hot path.
///
/// Header names are often repeated (content-type, cookie, ...), so they
/// are shared as `Arc<str>`; values are per-request data.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Response body shapes the engine can produce.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json(Value),
    Html(String),
    Bytes(Vec<u8>),
    Empty,
}

impl ResponseBody {
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_html(&self) -> Option<&str> {
        match self {
            ResponseBody::Html(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResponseBody::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Response produced by a target method, error renderer or the engine
/// itself.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    /// HTTP status code (200, 404, 500, ...)
    pub status: u16,
    /// HTTP response headers (stack-allocated for ≤16 headers)
    pub headers: HeaderVec,
    /// Response body
    pub body: ResponseBody,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// JSON response with the content type preset.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "application/json".to_string()));
        Self {
            status,
            headers,
            body: ResponseBody::Json(body),
        }
    }

    /// HTML response with the content type preset.
    #[must_use]
    pub fn html(status: u16, body: String) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), "text/html; charset=utf-8".to_string()));
        Self {
            status,
            headers,
            body: ResponseBody::Html(body),
        }
    }

    /// Raw bytes with an explicit content type (static assets).
    #[must_use]
    pub fn bytes(status: u16, content_type: &str, data: Vec<u8>) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), content_type.to_string()));
        Self {
            status,
            headers,
            body: ResponseBody::Bytes(data),
        }
    }

    /// JSON error payload `{ "error": message }`.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    /// 302 redirect.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("location"), location.to_string()));
        Self {
            status: 302,
            headers,
            body: ResponseBody::Empty,
        }
    }

    /// Get a header by name (case-insensitive).
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }
}

/// Failure raised by a target method, preprocessor or pending computation.
#[derive(Debug)]
pub enum HandlerError {
    /// Deliberate HTTP error with a chosen status code
    Status { status: u16, message: String },
    /// Unexpected failure inside a handler body
    Internal(anyhow::Error),
    /// Caught panic
    Panic(String),
}

impl HandlerError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        HandlerError::Status {
            status,
            message: message.into(),
        }
    }

    /// Status code for the rendered error response.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            HandlerError::Status { status, .. } => *status,
            HandlerError::Internal(_) | HandlerError::Panic(_) => 500,
        }
    }

    /// Full detail for debug-mode error payloads (error chain included).
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            HandlerError::Status { message, .. } => message.clone(),
            HandlerError::Internal(e) => format!("{e:#}"),
            HandlerError::Panic(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Status { status, message } => write!(f, "{status}: {message}"),
            HandlerError::Internal(e) => write!(f, "{e}"),
            HandlerError::Panic(msg) => write!(f, "handler panicked: {msg}"),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandlerError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        HandlerError::Internal(e)
    }
}

impl From<crate::templating::TemplateError> for HandlerError {
    fn from(e: crate::templating::TemplateError) -> Self {
        HandlerError::Internal(anyhow::Error::new(e))
    }
}

impl From<AssetError> for HandlerError {
    fn from(e: AssetError) -> Self {
        match e {
            AssetError::NotFound { ref namespace, ref name } => HandlerError::Status {
                status: 404,
                message: format!("asset not found: {namespace}:{name}"),
            },
            other => HandlerError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// What error escalation hands to error renderers: the status, a short
/// message, and (debug mode only) the full detail.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorReport {
    #[must_use]
    pub fn from_error(err: &HandlerError, debug: bool) -> Self {
        Self {
            status: err.http_status(),
            message: err.to_string(),
            detail: if debug { Some(err.detail()) } else { None },
        }
    }

    #[must_use]
    pub fn not_found(path: &str) -> Self {
        Self {
            status: 404,
            message: format!("no route for {path}"),
            detail: None,
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

enum PreprocessOutcome {
    Proceed,
    ShortCircuit(HandlerResponse),
    Failed(HandlerError),
}

/// The request dispatcher.
///
/// Holds the compiled route table, the plugin bus with its pre-compiled
/// sub-handler tables, the static resolver and the templating/locale
/// collaborator. Everything is immutable after construction; one
/// dispatcher is shared by all connection coroutines.
pub struct Dispatcher {
    table: Arc<RouteTable>,
    plugins: Arc<PluginBus>,
    plugin_tables: HashMap<String, Arc<RouteTable>>,
    resolver: StaticResolver,
    engine: Arc<dyn TemplateEngine>,
    config: RuntimeConfig,
}

impl Dispatcher {
    /// Build a dispatcher over a compiled route table.
    ///
    /// Compiles every plugin sub-handler into its own table; a conflict
    /// inside a plugin tree aborts startup exactly like one in the main
    /// tree.
    pub fn new(
        table: Arc<RouteTable>,
        plugins: Arc<PluginBus>,
        engine: Arc<dyn TemplateEngine>,
        config: RuntimeConfig,
    ) -> Result<Self, CompileError> {
        let mut plugin_tables = HashMap::new();
        for plugin in plugins.iter() {
            if let Some(sub) = plugin.sub_handler() {
                let sub_table = RouteTable::compile(&sub)?;
                info!(plugin = plugin.name(), "Plugin sub-handler compiled");
                plugin_tables.insert(plugin.name().to_string(), Arc::new(sub_table));
            }
        }
        let resolver = StaticResolver::new(Arc::clone(&engine));
        Ok(Self {
            table,
            plugins,
            plugin_tables,
            resolver,
            engine,
            config,
        })
    }

    #[must_use]
    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    #[must_use]
    pub fn resolver(&self) -> &StaticResolver {
        &self.resolver
    }

    /// Dispatch one inbound request to a response. Never panics outward;
    /// handler failures are converted through the escalation protocol.
    pub fn dispatch(&self, req: ParsedRequest) -> HandlerResponse {
        let request_id = RequestId::from_header_or_new(
            req.headers
                .iter()
                .find(|(k, _)| k.as_ref() == "x-request-id")
                .map(|(_, v)| v.as_str()),
        );
        debug!(
            request_id = %request_id,
            method = %req.method,
            path = %req.path,
            "Dispatch begin"
        );

        // Special paths, fixed priority: debug interface, static assets,
        // plugin namespaces. Everything else is normal routing.
        if self.config.debug && req.path.starts_with("/__debug__") {
            return self.debug_interface(&req);
        }
        if let Some(rest) = req.path.strip_prefix("/static/") {
            let rest = rest.to_string();
            return self.serve_static(&rest);
        }
        if let Some(rest) = req.path.strip_prefix("/_p/") {
            let rest = rest.to_string();
            return self.serve_plugin(&rest, req, request_id);
        }

        self.dispatch_routed(&self.table, req, request_id, true)
    }

    fn debug_interface(&self, req: &ParsedRequest) -> HandlerResponse {
        match normalize_request_path(&req.path) {
            "/__debug__/routes" => HandlerResponse::json(200, self.table.dump()),
            _ => HandlerResponse::error(404, "unknown debug path"),
        }
    }

    /// Look up a page handler by namespace, across the main tree and
    /// every plugin sub-tree.
    fn namespace(&self, module: &str) -> Option<Arc<HandlerType>> {
        if let Some(h) = self.table.namespace(module) {
            return Some(Arc::clone(h));
        }
        self.plugin_tables
            .values()
            .find_map(|t| t.namespace(module).map(Arc::clone))
    }

    fn serve_static(&self, rest: &str) -> HandlerResponse {
        let Some((module, asset)) = rest.split_once('/') else {
            return HandlerResponse::error(404, "static path must be /static/<module>/<path>");
        };
        let asset = asset.trim_start_matches('/');
        if asset.is_empty() {
            return HandlerResponse::error(404, "missing asset path");
        }
        if Path::new(asset)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            warn!(module = module, asset = asset, "Static path traversal rejected");
            return HandlerResponse::error(403, "Forbidden");
        }
        let Some(handler) = self.namespace(module) else {
            warn!(module = module, "Unknown static module");
            return HandlerResponse::error(404, "unknown static module");
        };

        match self.resolver.resolve(&handler, asset) {
            Ok(found) => HandlerResponse::bytes(200, content_type(asset), found.bytes),
            Err(err @ AssetError::NotFound { .. }) => {
                warn!(error = %err, "Static asset not found");
                HandlerResponse::json(
                    404,
                    json!({ "error": "Asset not found", "module": module, "asset": asset }),
                )
            }
            Err(err) => {
                error!(error = %err, "Static asset resolution failed");
                HandlerResponse::error(500, "asset resolution failed")
            }
        }
    }

    fn serve_plugin(
        &self,
        rest: &str,
        mut req: ParsedRequest,
        request_id: RequestId,
    ) -> HandlerResponse {
        let (name, tail) = match rest.split_once('/') {
            Some((n, t)) => (n, format!("/{t}")),
            None => (rest, "/".to_string()),
        };
        match self.plugin_tables.get(name).map(Arc::clone) {
            Some(table) => {
                req.path = tail;
                // The preprocessor chain applies to normal routing only;
                // plugin sub-handlers are dispatched bare.
                self.dispatch_routed(&table, req, request_id, false)
            }
            None => {
                warn!(plugin = name, "Unknown plugin path");
                self.render_not_found(&self.table, &req, request_id)
            }
        }
    }

    fn dispatch_routed(
        &self,
        table: &RouteTable,
        req: ParsedRequest,
        request_id: RequestId,
        preprocess: bool,
    ) -> HandlerResponse {
        let method: Method = match req.method.parse() {
            Ok(m) if SUPPORTED_VERBS.contains(&m) => m,
            _ => {
                warn!(method = %req.method, path = %req.path, "Unsupported method");
                return HandlerResponse::error(405, "Method Not Allowed");
            }
        };
        let path = normalize_request_path(&req.path).to_string();
        match table.match_route(&method, &path) {
            Some(m) => self.run_route(m, method, path, req, request_id, preprocess),
            None => self.render_not_found(table, &req, request_id),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_context(
        &self,
        page: &Arc<HandlerType>,
        owner: &Arc<HandlerType>,
        method: Method,
        path: String,
        path_params: ParamVec,
        req: &ParsedRequest,
        request_id: RequestId,
    ) -> RequestContext {
        let accept = req
            .headers
            .iter()
            .find(|(k, _)| k.as_ref() == "accept-language")
            .map(|(_, v)| v.as_str())
            .unwrap_or("");
        let locale = self
            .engine
            .negotiate_locale(accept, page.locales())
            .unwrap_or_else(|| self.config.default_language.clone());

        let descriptor = RequestDescriptor {
            request_id,
            method,
            path,
            path_params,
            query_params: req.query_params.clone(),
            headers: req.headers.clone(),
            cookies: req.cookies.clone(),
            body: req.body.clone(),
            locale,
        };
        let mut ctx = RequestContext::new(descriptor);
        for (key, value) in page.context_defaults() {
            ctx.scratch.insert(key.clone(), value.clone());
        }
        if !Arc::ptr_eq(page, owner) {
            for (key, value) in owner.context_defaults() {
                ctx.scratch.insert(key.clone(), value.clone());
            }
        }
        ctx
    }

    fn run_route(
        &self,
        route_match: RouteMatch,
        method: Method,
        path: String,
        req: ParsedRequest,
        request_id: RequestId,
        preprocess: bool,
    ) -> HandlerResponse {
        let route = route_match.route;
        let mut ctx = self.build_context(
            &route.page,
            &route.owner,
            method,
            path,
            route_match.path_params,
            &req,
            request_id,
        );

        if preprocess {
            match self.run_preprocessors(&mut ctx) {
                PreprocessOutcome::Proceed => {}
                PreprocessOutcome::ShortCircuit(resp) => {
                    info!(
                        request_id = %request_id,
                        status = resp.status,
                        "Request short-circuited by preprocessor"
                    );
                    return resp;
                }
                PreprocessOutcome::Failed(err) => return self.escalate(&route, ctx, err),
            }
        }

        let Some(target) = route.owner.method(&route.target).map(Arc::clone) else {
            // compile() verifies targets; this can only mean table and tree
            // went out of sync
            return self.escalate(
                &route,
                ctx,
                HandlerError::Internal(anyhow::anyhow!(
                    "method '{}' not registered on '{}'",
                    route.target,
                    route.owner.name()
                )),
            );
        };

        info!(
            request_id = %request_id,
            handler = route.owner.name(),
            target = %route.target,
            "Handler execution start"
        );
        let started = Instant::now();
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| target(&mut ctx)));
        match outcome {
            Ok(Ok(resp)) => {
                info!(
                    request_id = %request_id,
                    handler = route.owner.name(),
                    status = resp.status,
                    execution_time_ms = started.elapsed().as_millis() as u64,
                    "Handler execution complete"
                );
                resp
            }
            Ok(Err(err)) => self.escalate(&route, ctx, err),
            Err(panic) => {
                let message = panic_message(panic);
                error!(
                    request_id = %request_id,
                    handler = route.owner.name(),
                    panic_message = %message,
                    "Handler panicked - CRITICAL"
                );
                self.escalate(&route, ctx, HandlerError::Panic(message))
            }
        }
    }

    /// Run the preprocessor chain: collect every step's result in
    /// registration order, then join pending computations with fan-in
    /// semantics. The first failure wins and the remaining handles are
    /// dropped; their coroutines run to completion and their results are
    /// discarded.
    fn run_preprocessors(&self, ctx: &mut RequestContext) -> PreprocessOutcome {
        let results = self.plugins.pre_process(ctx);
        debug!(
            request_id = %ctx.request.request_id,
            steps = results.len(),
            "Preprocessor chain collected"
        );

        let mut pending = Vec::new();
        for result in results {
            match result {
                PreprocessorResult::Continue => {}
                PreprocessorResult::Pending(handle) => pending.push(handle),
                PreprocessorResult::ShortCircuit(resp) => {
                    return PreprocessOutcome::ShortCircuit(resp);
                }
            }
        }

        for handle in pending {
            match handle.join() {
                Ok(Ok(writes)) => {
                    for (key, value) in writes {
                        ctx.scratch.insert(key, value);
                    }
                }
                Ok(Err(err)) => {
                    warn!(
                        request_id = %ctx.request.request_id,
                        error = %err,
                        "Preprocessor computation failed"
                    );
                    return PreprocessOutcome::Failed(err);
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    error!(
                        request_id = %ctx.request.request_id,
                        panic_message = %message,
                        "Preprocessor computation panicked - CRITICAL"
                    );
                    return PreprocessOutcome::Failed(HandlerError::Panic(message));
                }
            }
        }
        PreprocessOutcome::Proceed
    }

    /// Climb the route's logical-parent chain until a handler renders the
    /// error.
    ///
    /// At every hop a fresh parent context is constructed (its own seeded
    /// defaults first) and every scratch entry not already present is
    /// transferred from the failing child. A parent with a custom error
    /// renderer terminates the climb; otherwise the chain's last handler
    /// renders the built-in page.
    fn escalate(
        &self,
        route: &Route,
        mut ctx: RequestContext,
        err: HandlerError,
    ) -> HandlerResponse {
        let report = ErrorReport::from_error(&err, self.config.debug);
        error!(
            request_id = %ctx.request.request_id,
            handler = route.owner.name(),
            status = report.status,
            error = %err,
            "Handler raised, escalating to logical parents"
        );

        for parent in &route.escalation {
            if Arc::ptr_eq(parent, &route.owner) {
                continue;
            }
            let mut parent_ctx = RequestContext::new(ctx.request.clone());
            for (key, value) in parent.context_defaults() {
                parent_ctx.scratch.insert(key.clone(), value.clone());
            }
            parent_ctx.adopt_scratch(&ctx);
            ctx = parent_ctx;
            if parent.error_renderer().is_some() {
                debug!(handler = parent.name(), "Error rendered by logical parent");
                return self.render_error_at(parent, &mut ctx, &report);
            }
        }

        let terminal = route.escalation.last().unwrap_or(&route.owner);
        self.render_error_at(terminal, &mut ctx, &report)
    }

    fn render_not_found(
        &self,
        table: &RouteTable,
        req: &ParsedRequest,
        request_id: RequestId,
    ) -> HandlerResponse {
        let root = table.root();
        info!(path = %req.path, "No handler found, synthesizing 404");
        let method = req.method.parse().unwrap_or(Method::GET);
        let path = normalize_request_path(&req.path).to_string();
        let mut ctx =
            self.build_context(root, root, method, path, ParamVec::new(), req, request_id);
        let report = ErrorReport::not_found(&req.path);
        self.render_error_at(root, &mut ctx, &report)
    }

    fn render_error_at(
        &self,
        handler: &Arc<HandlerType>,
        ctx: &mut RequestContext,
        report: &ErrorReport,
    ) -> HandlerResponse {
        if let Some(renderer) = handler.error_renderer().map(Arc::clone) {
            match std::panic::catch_unwind(AssertUnwindSafe(|| renderer(ctx, report))) {
                Ok(resp) => return resp,
                Err(panic) => {
                    error!(
                        handler = handler.name(),
                        panic_message = %panic_message(panic),
                        "Error renderer panicked, falling back to built-in page"
                    );
                }
            }
        }
        self.render_builtin_error(report)
    }

    /// Built-in terminal rendering: full detail in debug mode, a generic
    /// page in production. Both sit at the end of the same escalation
    /// protocol; only the output differs.
    fn render_builtin_error(&self, report: &ErrorReport) -> HandlerResponse {
        if self.config.debug {
            let payload = serde_json::to_value(report)
                .unwrap_or_else(|_| json!({ "error": report.message }));
            HandlerResponse::json(report.status, payload)
        } else {
            let reason = status_reason(report.status);
            HandlerResponse::html(
                report.status,
                format!(
                    "<!DOCTYPE html>\n<html><head><title>{status} {reason}</title></head>\n\
                     <body><h1>{status} {reason}</h1>\
                     <p>The server could not fulfill this request.</p></body></html>\n",
                    status = report.status,
                ),
            )
        }
    }
}
