//! # Dispatcher Module
//!
//! Per-request dispatch over the compiled route table.
//!
//! ## Overview
//!
//! The dispatcher is the heart of request handling. For every inbound
//! request it:
//!
//! - intercepts the special path prefixes in fixed priority order: the
//!   `/__debug__/` interface (debug mode only), `/static/<module>/...`
//!   (delegated to the static resolver scoped to `<module>`), and
//!   `/_p/<plugin>/...` (delegated to a plugin-registered sub-handler)
//! - normalizes the path and scans the verb's route list in table order,
//!   selecting the first matching pattern
//! - constructs a fresh request context for the owning handler, with the
//!   locale negotiated against the owning page's available locales
//! - runs the preprocessor chain supplied by the plugin bus, joining
//!   pending coroutines in registration order before proceeding
//! - invokes the target method with panic recovery
//! - on failure, climbs the route's logical-parent chain, transferring
//!   scratch entries upward, until a handler renders the error response
//! - synthesizes a 404 through the root handler's error path when nothing
//!   matched
//!
//! ## Concurrency
//!
//! Dispatch runs on the `may` coroutine runtime: suspension happens at
//! pending preprocessor computations, and concurrency across requests
//! comes from coroutine interleaving. The route table and handler tree
//! are immutable after startup, so the hot path takes no locks; the
//! request context is exclusively owned by one request's dispatch chain.

mod core;

pub use core::{
    Dispatcher, ErrorReport, HandlerError, HandlerResponse, HeaderVec, ResponseBody,
    MAX_INLINE_HEADERS,
};
