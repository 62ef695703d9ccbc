//! The handler-type tree: the declarative model the route compiler walks.
//!
//! A [`HandlerType`] is an immutable node describing one request-handling
//! module: its route annotations (verb + local path + target method), its
//! registered method callables, its ordered parent list, its mount table
//! of child handlers, and its static/template asset namespace.
//!
//! Declaration is an explicit two-phase process: build the tree with
//! [`HandlerTypeBuilder`] (plain data, no registration side effects), then
//! run [`RouteTable::compile`](crate::router::RouteTable::compile) over the
//! finished tree at startup. Once built, a node never changes; the whole
//! tree is shared behind `Arc`s and is safe for lock-free concurrent reads
//! while the process serves traffic.
//!
//! ```rust,ignore
//! use http::Method;
//! use trellis::{HandlerResponse, HandlerType, RouteTable};
//!
//! let cart = HandlerType::fragment("cart")
//!     .get("/view", "view", |ctx| {
//!         Ok(HandlerResponse::html(200, "<p>your cart</p>".to_string()))
//!     })
//!     .build();
//!
//! let shop = HandlerType::page("shop", "shop")
//!     .get("/", "index", |ctx| Ok(HandlerResponse::html(200, "shop".into())))
//!     .get("/<item>", "item", |ctx| {
//!         let item = ctx.request.get_path_param("item").unwrap_or("?");
//!         Ok(HandlerResponse::html(200, format!("item {item}")))
//!     })
//!     .mount("/cart", &cart)
//!     .build();
//!
//! let table = RouteTable::compile(&shop)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use http::Method;
use serde_json::Value;

use crate::context::RequestContext;
use crate::dispatcher::{ErrorReport, HandlerError, HandlerResponse};

/// Whether a handler establishes its own page context or inherits one.
///
/// A `Page` handler owns a static-asset namespace, template directory and
/// locale set, and acts as a logical parent for error escalation. A
/// `Fragment` is a sub-handler mounted inside a page: it inherits the
/// nearest enclosing page's context and never renders its own error pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Page,
    Fragment,
}

/// A target method invoked with the per-request context.
pub type HandlerFn =
    Arc<dyn Fn(&mut RequestContext) -> Result<HandlerResponse, HandlerError> + Send + Sync>;

/// A custom error renderer, invoked at the end of the escalation chain.
pub type ErrorFn = Arc<dyn Fn(&mut RequestContext, &ErrorReport) -> HandlerResponse + Send + Sync>;

/// Route annotation: plain data tying a verb and local path pattern to a
/// named method on the owning handler.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub method: Method,
    pub path: String,
    pub target: String,
}

/// A child handler attached under a path prefix.
#[derive(Clone)]
pub struct MountEntry {
    pub prefix: String,
    pub child: Arc<HandlerType>,
}

/// One node in the handler tree. Immutable after [`HandlerTypeBuilder::build`].
pub struct HandlerType {
    name: String,
    kind: HandlerKind,
    namespace: String,
    parents: Vec<Arc<HandlerType>>,
    route_specs: Vec<RouteSpec>,
    mounts: Vec<MountEntry>,
    methods: HashMap<String, HandlerFn>,
    error_renderer: Option<ErrorFn>,
    static_dir: Option<PathBuf>,
    template_dir: Option<PathBuf>,
    locales: Vec<String>,
    context_defaults: HashMap<String, Value>,
}

impl HandlerType {
    /// Start building a full page handler with its own asset namespace.
    pub fn page(name: &str, namespace: &str) -> HandlerTypeBuilder {
        HandlerTypeBuilder::new(name, HandlerKind::Page, namespace)
    }

    /// Start building a fragment handler; it inherits the namespace,
    /// templates and locales of the nearest enclosing page.
    pub fn fragment(name: &str) -> HandlerTypeBuilder {
        HandlerTypeBuilder::new(name, HandlerKind::Fragment, "")
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    #[must_use]
    pub fn is_page(&self) -> bool {
        self.kind == HandlerKind::Page
    }

    /// Static-asset namespace. Empty for fragments.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Declared parent handlers, in declaration order. Asset resolution
    /// traverses this list breadth-first.
    #[must_use]
    pub fn parents(&self) -> &[Arc<HandlerType>] {
        &self.parents
    }

    #[must_use]
    pub fn route_specs(&self) -> &[RouteSpec] {
        &self.route_specs
    }

    #[must_use]
    pub fn mounts(&self) -> &[MountEntry] {
        &self.mounts
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<&HandlerFn> {
        self.methods.get(name)
    }

    #[must_use]
    pub fn error_renderer(&self) -> Option<&ErrorFn> {
        self.error_renderer.as_ref()
    }

    #[must_use]
    pub fn static_dir(&self) -> Option<&PathBuf> {
        self.static_dir.as_ref()
    }

    #[must_use]
    pub fn template_dir(&self) -> Option<&PathBuf> {
        self.template_dir.as_ref()
    }

    /// Locales this handler ships translations for.
    #[must_use]
    pub fn locales(&self) -> &[String] {
        &self.locales
    }

    /// Entries seeded into every fresh request context for this handler.
    #[must_use]
    pub fn context_defaults(&self) -> &HashMap<String, Value> {
        &self.context_defaults
    }
}

impl fmt::Debug for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("namespace", &self.namespace)
            .field("routes", &self.route_specs.len())
            .field("mounts", &self.mounts.len())
            .field("parents", &self.parents.len())
            .finish()
    }
}

/// Builder for [`HandlerType`] nodes.
///
/// Route annotations and method callables can be declared separately
/// ([`annotate`](Self::annotate) + [`method`](Self::method)) or in one step
/// with the verb helpers ([`get`](Self::get), [`post`](Self::post), ...).
pub struct HandlerTypeBuilder {
    name: String,
    kind: HandlerKind,
    namespace: String,
    parents: Vec<Arc<HandlerType>>,
    route_specs: Vec<RouteSpec>,
    mounts: Vec<MountEntry>,
    methods: HashMap<String, HandlerFn>,
    error_renderer: Option<ErrorFn>,
    static_dir: Option<PathBuf>,
    template_dir: Option<PathBuf>,
    locales: Vec<String>,
    context_defaults: HashMap<String, Value>,
}

impl HandlerTypeBuilder {
    fn new(name: &str, kind: HandlerKind, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            namespace: namespace.to_string(),
            parents: Vec::new(),
            route_specs: Vec::new(),
            mounts: Vec::new(),
            methods: HashMap::new(),
            error_renderer: None,
            static_dir: None,
            template_dir: None,
            locales: Vec::new(),
            context_defaults: HashMap::new(),
        }
    }

    /// Declare a parent handler. Order matters: asset resolution visits
    /// parents breadth-first in declaration order.
    #[must_use]
    pub fn parent(mut self, parent: &Arc<HandlerType>) -> Self {
        self.parents.push(Arc::clone(parent));
        self
    }

    /// Annotate a method with verb/path metadata without registering the
    /// callable. Compilation fails if the target is never registered.
    #[must_use]
    pub fn annotate(mut self, method: Method, path: &str, target: &str) -> Self {
        self.route_specs.push(RouteSpec {
            method,
            path: path.to_string(),
            target: target.to_string(),
        });
        self
    }

    /// Register a method callable by name.
    #[must_use]
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<HandlerResponse, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Annotate and register a method for HTTP GET in one step.
    #[must_use]
    pub fn get<F>(self, path: &str, target: &str, f: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<HandlerResponse, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.annotate(Method::GET, path, target).method(target, f)
    }

    /// Annotate and register a method for HTTP POST in one step.
    #[must_use]
    pub fn post<F>(self, path: &str, target: &str, f: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<HandlerResponse, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.annotate(Method::POST, path, target).method(target, f)
    }

    /// Annotate and register a method for HTTP PUT in one step.
    #[must_use]
    pub fn put<F>(self, path: &str, target: &str, f: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<HandlerResponse, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.annotate(Method::PUT, path, target).method(target, f)
    }

    /// Annotate and register a method for HTTP DELETE in one step.
    #[must_use]
    pub fn delete<F>(self, path: &str, target: &str, f: F) -> Self
    where
        F: Fn(&mut RequestContext) -> Result<HandlerResponse, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.annotate(Method::DELETE, path, target).method(target, f)
    }

    /// Mount a child handler under a path prefix.
    #[must_use]
    pub fn mount(mut self, prefix: &str, child: &Arc<HandlerType>) -> Self {
        self.mounts.push(MountEntry {
            prefix: prefix.to_string(),
            child: Arc::clone(child),
        });
        self
    }

    /// Register a custom error renderer. It fires when error escalation
    /// reaches this handler; handlers without one pass the error on.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext, &ErrorReport) -> HandlerResponse + Send + Sync + 'static,
    {
        self.error_renderer = Some(Arc::new(f));
        self
    }

    /// Directory holding literal packaged assets for this namespace.
    #[must_use]
    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    /// Directory holding templates; `static/<name>` templates serve as
    /// template-producible assets.
    #[must_use]
    pub fn template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(dir.into());
        self
    }

    /// Declare an available locale (e.g. `de_AT`).
    #[must_use]
    pub fn locale(mut self, tag: &str) -> Self {
        self.locales.push(tag.to_string());
        self
    }

    /// Seed a scratch entry into every fresh request context constructed
    /// for this handler.
    #[must_use]
    pub fn seed(mut self, key: &str, value: Value) -> Self {
        self.context_defaults.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<HandlerType> {
        Arc::new(HandlerType {
            name: self.name,
            kind: self.kind,
            namespace: self.namespace,
            parents: self.parents,
            route_specs: self.route_specs,
            mounts: self.mounts,
            methods: self.methods,
            error_renderer: self.error_renderer,
            static_dir: self.static_dir,
            template_dir: self.template_dir,
            locales: self.locales,
            context_defaults: self.context_defaults,
        })
    }
}
