//! # Trellis
//!
//! **Trellis** is a coroutine-powered routing and dispatch engine for web
//! applications composed from a tree of handler modules.
//!
//! ## Overview
//!
//! Applications declare *handler types*: reusable request-handling
//! modules carrying per-method route annotations, parent handlers for
//! asset inheritance, and mounted child handlers under path prefixes.
//! At startup the tree is compiled into an immutable route table; per
//! request, the dispatcher matches the table, runs a plugin-supplied
//! preprocessing chain, and invokes the target method on the `may`
//! coroutine runtime. Failures bubble up the mount tree to the owning
//! page handler instead of letting sub-handlers render bespoke error
//! pages.
//!
//! ## Architecture
//!
//! The library is organized into these modules:
//!
//! - **[`handler`]** - the declarative handler-type tree (routes, mounts,
//!   parents, namespaces), built in an explicit two-phase process
//! - **[`router`]** - route compilation and first-match path resolution
//! - **[`dispatcher`]** - per-request dispatch: special-path interception,
//!   preprocessor fan-in, target invocation, error escalation
//! - **[`plugins`]** - the plugin bus contract: preprocessing steps and
//!   `/_p/<name>/...` sub-handlers
//! - **[`static_files`]** - namespace-scoped asset resolution with
//!   breadth-first parent fallback and content-hash cache busting
//! - **[`templating`]** - the templating/locale collaborator boundary
//! - **[`server`]** - HTTP transport glue built on `may_minihttp`
//! - **[`context`]** - the immutable request descriptor and the mutable
//!   per-request scratch space
//! - **[`runtime_config`]** - environment-based runtime configuration
//!
//! ## Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as AppService<br/>(may_minihttp)
//!     participant Dispatcher
//!     participant Bus as PluginBus
//!     participant Handler as Target Method
//!     participant Parent as Logical Parent
//!
//!     Client->>Server: HTTP Request
//!     Server->>Dispatcher: dispatch(ParsedRequest)
//!     Dispatcher->>Dispatcher: intercept /__debug__, /static, /_p
//!     Dispatcher->>Dispatcher: normalize path, scan verb table,<br/>first match wins
//!     Dispatcher->>Bus: pre_process(ctx)  [once per request]
//!     Bus-->>Dispatcher: results (sync / pending / short-circuit)
//!     Dispatcher->>Dispatcher: join pending coroutines<br/>in registration order
//!     Dispatcher->>Handler: invoke with bound path variables
//!     alt Handler raises
//!         Dispatcher->>Parent: transfer scratch, render error
//!     end
//!     Dispatcher-->>Server: HandlerResponse
//!     Server-->>Client: HTTP Response
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trellis::{
//!     AppService, Dispatcher, HandlerResponse, HandlerType, HttpServer,
//!     MiniJinjaEngine, PluginBus, RouteTable, RuntimeConfig,
//! };
//!
//! let root = HandlerType::page("main", "myapp")
//!     .get("/", "index", |_ctx| {
//!         Ok(HandlerResponse::html(200, "<h1>hello</h1>".to_string()))
//!     })
//!     .build();
//!
//! let config = RuntimeConfig::from_env();
//! let table = Arc::new(RouteTable::compile(&root)?);
//! let dispatcher = Arc::new(Dispatcher::new(
//!     table,
//!     Arc::new(PluginBus::new()),
//!     Arc::new(MiniJinjaEngine::new()),
//!     config.clone(),
//! )?);
//!
//! let handle = HttpServer(AppService::new(dispatcher)).start(config.bind_addr())?;
//! handle.join().unwrap();
//! ```
//!
//! ## Runtime Considerations
//!
//! Trellis uses the `may` coroutine runtime, not tokio or async-std:
//!
//! - Pending preprocessor computations run in coroutines and are joined
//!   before the target method executes
//! - Coroutine stack size is configurable via `TRELLIS_STACK_SIZE`
//! - The route table and handler tree are immutable after startup, so the
//!   request hot path takes no locks

pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod ids;
pub mod plugins;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod static_files;
pub mod templating;

pub use context::{RequestContext, RequestDescriptor};
pub use dispatcher::{
    Dispatcher, ErrorReport, HandlerError, HandlerResponse, HeaderVec, ResponseBody,
};
pub use handler::{HandlerKind, HandlerType, HandlerTypeBuilder};
pub use ids::RequestId;
pub use plugins::{spawn_pending, PluginBus, PreprocessorResult, RequestPlugin, ScratchWrites};
pub use router::{normalize_request_path, CompileError, ParamVec, Route, RouteMatch, RouteTable};
pub use runtime_config::RuntimeConfig;
pub use server::{AppService, HttpServer, ParsedRequest, ServerHandle};
pub use static_files::{asset_url, AssetError, ResolvedAsset, StaticResolver};
pub use templating::{MiniJinjaEngine, TemplateEngine, TemplateError};
