//! Per-request state: the immutable request descriptor and the mutable
//! scratch space.
//!
//! Earlier designs in this space tend to blur a handler instance, the
//! template context and the mutable request state into one bag. Here the
//! split is explicit: [`RequestDescriptor`] is fixed once the route match
//! and locale negotiation are done, while the [`RequestContext`] scratch
//! map is the only mutable surface. Preprocessors write into the scratch
//! map, the target method reads it, and error escalation transfers it to
//! parent handler contexts.

use std::collections::HashMap;

use http::Method;
use serde_json::Value;

use crate::dispatcher::HeaderVec;
use crate::ids::RequestId;
use crate::router::ParamVec;

/// Immutable description of one inbound request.
///
/// Constructed by the dispatcher after route matching and locale
/// negotiation; never mutated afterwards. Cloned cheaply when error
/// escalation builds a parent handler context for the same request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Unique request ID for tracing and correlation
    pub request_id: RequestId,
    /// HTTP method (GET, POST, PUT or DELETE)
    pub method: Method,
    /// Normalized request path
    pub path: String,
    /// Path variables bound by the matched route pattern
    pub path_params: ParamVec,
    /// Query string parameters
    pub query_params: ParamVec,
    /// HTTP headers (lowercase names)
    pub headers: HeaderVec,
    /// Cookies parsed from the Cookie header
    pub cookies: HeaderVec,
    /// Request body parsed as JSON (if present)
    pub body: Option<Value>,
    /// Locale negotiated from `Accept-Language` against the page handler's
    /// available locales
    pub locale: String,
}

impl RequestDescriptor {
    /// Get a path variable by name.
    ///
    /// Uses "last write wins" semantics: if duplicate variable names exist
    /// at different path depths, the deepest occurrence is returned.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name (last occurrence wins).
    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a header by name (case-insensitive per RFC 7230).
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a cookie by name.
    #[inline]
    #[must_use]
    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Mutable per-request context handed to preprocessors, target methods and
/// error renderers.
///
/// The scratch map carries data forward through the request: a
/// preprocessor may inject an authenticated identity, the target method
/// may stash values for the template, and on failure every entry not
/// already present on the parent context is transferred up the escalation
/// chain. It is owned by exactly one request's dispatch chain and is never
/// shared across requests.
pub struct RequestContext {
    /// The immutable request descriptor
    pub request: RequestDescriptor,
    /// Mutable key/value scratch space
    pub scratch: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new(request: RequestDescriptor) -> Self {
        Self {
            request,
            scratch: HashMap::new(),
        }
    }

    /// Insert a scratch entry, replacing any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.scratch.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.scratch.contains_key(key)
    }

    /// Copy every scratch entry from `other` that is not already present
    /// here. Used by error escalation: entries seeded on the parent context
    /// keep priority over values bubbling up from the failing child.
    pub fn adopt_scratch(&mut self, other: &RequestContext) {
        for (key, value) in &other.scratch {
            if !self.scratch.contains_key(key) {
                self.scratch.insert(key.clone(), value.clone());
            }
        }
    }

    /// The scratch space as a JSON object for template rendering, with the
    /// request path and negotiated locale merged in.
    #[must_use]
    pub fn template_context(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.scratch {
            map.insert(key.clone(), value.clone());
        }
        map.insert("path".to_string(), Value::String(self.request.path.clone()));
        map.insert(
            "locale".to_string(),
            Value::String(self.request.locale.clone()),
        );
        Value::Object(map)
    }
}
