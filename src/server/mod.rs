//! Transport glue over `may_minihttp`.
//!
//! HTTP parsing is a collaborator, not part of the dispatch core: this
//! module extracts a [`request::ParsedRequest`] from the wire, hands it to
//! the dispatcher, and writes the resulting
//! [`HandlerResponse`](crate::dispatcher::HandlerResponse) back out.

pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_request, ParsedRequest};
pub use service::AppService;
