use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use regex::Regex;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::handler::HandlerType;

/// Maximum number of path/query parameters before heap allocation.
/// Most route patterns bind no more than a handful of variables.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Variable names come from the compiled route tree and are shared as
/// `Arc<str>` (O(1) clone); values are per-request data from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// The verbs the dispatcher serves. Annotations with other methods are
/// dropped at compile time with a warning.
pub const SUPPORTED_VERBS: [Method; 4] =
    [Method::GET, Method::POST, Method::PUT, Method::DELETE];

/// Path prefixes intercepted before normal routing; route patterns must
/// not claim them.
const RESERVED_PREFIXES: [&str; 3] = ["/static", "/_p", "/__debug__"];

/// Collapse trailing slashes on a request path; the empty path becomes `/`.
///
/// Dispatching `/a/b/` must match the same route as `/a/b`, and `""` the
/// same as `/`.
#[must_use]
pub fn normalize_request_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn normalize_pattern(pattern: &str) -> String {
    let trimmed = pattern.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Convert a route pattern to an anchored regex and the ordered list of
/// variable segment names.
///
/// `/users/<id>/posts` becomes `^/users/([^/]+)/posts$` with names
/// `["id"]`. Literal segments are escaped.
pub(crate) fn pattern_to_regex(pattern: &str) -> (Regex, Vec<Arc<str>>) {
    if pattern == "/" {
        return (
            Regex::new("^/$").expect("Failed to compile path regex"),
            Vec::new(),
        );
    }

    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut names: Vec<Arc<str>> = Vec::new();

    for segment in pattern.split('/') {
        if segment.starts_with('<') && segment.ends_with('>') && segment.len() > 2 {
            names.push(Arc::from(&segment[1..segment.len() - 1]));
            re.push_str("/([^/]+)");
        } else if !segment.is_empty() {
            re.push('/');
            re.push_str(&regex::escape(segment));
        }
    }

    re.push('$');
    let regex = Regex::new(&re).expect("Failed to compile path regex");
    (regex, names)
}

/// A compiled route: one (verb, pattern) entry in the table.
///
/// Created by [`RouteTable::compile`], read-only afterwards. Besides the
/// matchable pattern it records the owning handler, the target method
/// name, the nearest enclosing page handler (whose namespace, templates
/// and locales apply) and the logical-parent chain used by error
/// escalation (nearest parent first, root last).
pub struct Route {
    pub method: Method,
    /// Normalized full pattern, mount prefixes included
    pub pattern: String,
    regex: Regex,
    param_names: Vec<Arc<str>>,
    /// Handler the annotated method lives on
    pub owner: Arc<HandlerType>,
    /// Name of the target method on `owner`
    pub target: String,
    /// Nearest enclosing page handler; `owner` itself when it is a page
    pub page: Arc<HandlerType>,
    /// Logical parents for error escalation, nearest first
    pub escalation: Vec<Arc<HandlerType>>,
}

impl Route {
    /// Test this route against a normalized request path, binding variable
    /// segments positionally on success.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<ParamVec> {
        let caps = self.regex.captures(path)?;
        let mut params = ParamVec::new();
        for (i, name) in self.param_names.iter().enumerate() {
            let value = caps.get(i + 1)?.as_str().to_string();
            params.push((Arc::clone(name), value));
        }
        Some(params)
    }

    /// Reverse URL construction: substitute variable segments from
    /// `values`. Returns `None` if a variable has no value.
    #[must_use]
    pub fn url_for(&self, values: &HashMap<String, String>) -> Option<String> {
        if self.pattern == "/" {
            return Some("/".to_string());
        }
        let mut out = String::with_capacity(self.pattern.len());
        for segment in self.pattern.split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            if segment.starts_with('<') && segment.ends_with('>') && segment.len() > 2 {
                let name = &segment[1..segment.len() - 1];
                out.push_str(values.get(name)?);
            } else {
                out.push_str(segment);
            }
        }
        Some(out)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("owner", &self.owner.name())
            .field("target", &self.target)
            .finish()
    }
}

/// Result of successfully matching a request path to a route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route (Arc to avoid expensive clones)
    pub route: Arc<Route>,
    /// Path variables extracted from the URL
    pub path_params: ParamVec,
}

/// Compile-time routing failure. Any of these aborts startup; none is
/// ever surfaced to a live request.
#[derive(Debug)]
pub enum CompileError {
    /// Two routes for the same verb share a normalized pattern
    DuplicateRoute {
        method: Method,
        pattern: String,
        first_owner: String,
        second_owner: String,
    },
    /// A pattern claims a reserved prefix (`/static`, `/_p`, `/__debug__`)
    ReservedPrefix { pattern: String, owner: String },
    /// A route annotation names a method that was never registered
    UnknownTarget { handler: String, target: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::DuplicateRoute {
                method,
                pattern,
                first_owner,
                second_owner,
            } => write!(
                f,
                "duplicate route: {method} {pattern} declared by both '{first_owner}' and '{second_owner}'"
            ),
            CompileError::ReservedPrefix { pattern, owner } => write!(
                f,
                "route pattern '{pattern}' on '{owner}' claims a reserved prefix \
                 (/static, /_p and /__debug__ are not assignable)"
            ),
            CompileError::UnknownTarget { handler, target } => write!(
                f,
                "route on '{handler}' targets method '{target}' which is not registered"
            ),
        }
    }
}

impl std::error::Error for CompileError {}

/// The compiled route table: per-verb ordered route lists plus the
/// namespace index consulted by `/static/<module>/...` interception.
///
/// Built once at startup and shared behind an `Arc`; it is never mutated
/// afterwards, so concurrent reads need no locking.
pub struct RouteTable {
    by_verb: HashMap<Method, Vec<Arc<Route>>>,
    namespaces: HashMap<String, Arc<HandlerType>>,
    root: Arc<HandlerType>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.by_verb.values().map(Vec::len).sum::<usize>())
            .field("namespaces", &self.namespaces.keys().collect::<Vec<_>>())
            .field("root", &self.root.name())
            .finish()
    }
}

impl RouteTable {
    /// Walk the handler tree rooted at `root` and compile the route table.
    ///
    /// Recursion carries three pieces of context downwards: the
    /// concatenated mount prefix, the nearest enclosing page handler
    /// (fragments inherit its namespace/templates/locales instead of
    /// establishing their own), and the chain of enclosing pages that
    /// error escalation climbs.
    pub fn compile(root: &Arc<HandlerType>) -> Result<Self, CompileError> {
        let mut routes: Vec<Arc<Route>> = Vec::new();
        let mut namespaces: HashMap<String, Arc<HandlerType>> = HashMap::new();
        Self::visit(root, root, &[], "", &mut routes, &mut namespaces)?;

        let mut by_verb: HashMap<Method, Vec<Arc<Route>>> = HashMap::new();
        for verb in SUPPORTED_VERBS {
            by_verb.insert(verb, Vec::new());
        }
        for route in routes {
            if let Some(list) = by_verb.get_mut(&route.method) {
                list.push(route);
            }
        }

        for (verb, list) in by_verb.iter_mut() {
            // Descending string sort: longer literal prefixes and literal
            // segments ('a'..'z') sort above variable segments ('<').
            list.sort_by(|a, b| b.pattern.cmp(&a.pattern));
            for pair in list.windows(2) {
                if pair[0].pattern == pair[1].pattern {
                    return Err(CompileError::DuplicateRoute {
                        method: verb.clone(),
                        pattern: pair[0].pattern.clone(),
                        first_owner: pair[0].owner.name().to_string(),
                        second_owner: pair[1].owner.name().to_string(),
                    });
                }
            }
        }

        let total: usize = by_verb.values().map(Vec::len).sum();
        info!(
            routes_count = total,
            namespaces = namespaces.len(),
            "Routing table compiled"
        );

        Ok(Self {
            by_verb,
            namespaces,
            root: Arc::clone(root),
        })
    }

    fn visit(
        node: &Arc<HandlerType>,
        page: &Arc<HandlerType>,
        enclosing: &[Arc<HandlerType>],
        prefix: &str,
        routes: &mut Vec<Arc<Route>>,
        namespaces: &mut HashMap<String, Arc<HandlerType>>,
    ) -> Result<(), CompileError> {
        let page = if node.is_page() { node } else { page };
        if node.is_page() && !node.namespace().is_empty() {
            namespaces
                .entry(node.namespace().to_string())
                .or_insert_with(|| Arc::clone(node));
        }

        for spec in node.route_specs() {
            if !SUPPORTED_VERBS.contains(&spec.method) {
                warn!(
                    method = %spec.method,
                    path = %spec.path,
                    handler = node.name(),
                    "Unsupported verb on route annotation, skipping"
                );
                continue;
            }
            if node.method(&spec.target).is_none() {
                return Err(CompileError::UnknownTarget {
                    handler: node.name().to_string(),
                    target: spec.target.clone(),
                });
            }

            let pattern = normalize_pattern(&format!("{prefix}{}", spec.path));
            for reserved in RESERVED_PREFIXES {
                if pattern == reserved || pattern.starts_with(&format!("{reserved}/")) {
                    return Err(CompileError::ReservedPrefix {
                        pattern,
                        owner: node.name().to_string(),
                    });
                }
            }

            let (regex, param_names) = pattern_to_regex(&pattern);
            debug!(
                method = %spec.method,
                pattern = %pattern,
                handler = node.name(),
                target = %spec.target,
                "Route compiled"
            );
            routes.push(Arc::new(Route {
                method: spec.method.clone(),
                pattern,
                regex,
                param_names,
                owner: Arc::clone(node),
                target: spec.target.clone(),
                page: Arc::clone(page),
                escalation: enclosing.to_vec(),
            }));
        }

        // Pages become the logical parent for everything mounted below
        // them; fragments are transparent to escalation.
        let child_enclosing: Vec<Arc<HandlerType>> = if node.is_page() {
            let mut chain = Vec::with_capacity(enclosing.len() + 1);
            chain.push(Arc::clone(node));
            chain.extend_from_slice(enclosing);
            chain
        } else {
            enclosing.to_vec()
        };

        for mount in node.mounts() {
            Self::visit(
                &mount.child,
                page,
                &child_enclosing,
                &format!("{prefix}{}", mount.prefix),
                routes,
                namespaces,
            )?;
        }
        Ok(())
    }

    /// Match a request against the verb's route list in table order,
    /// selecting the first route whose pattern matches.
    ///
    /// The path must already be normalized with [`normalize_request_path`].
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        debug!(method = %method, path = %path, "Route match attempt");
        let list = self.by_verb.get(method)?;

        let match_start = std::time::Instant::now();
        for route in list {
            if let Some(params) = route.matches(path) {
                let duration = match_start.elapsed();
                info!(
                    method = %method,
                    path = %path,
                    pattern = %route.pattern,
                    handler = route.owner.name(),
                    target = %route.target,
                    duration_us = duration.as_micros() as u64,
                    "Route matched"
                );
                return Some(RouteMatch {
                    route: Arc::clone(route),
                    path_params: params,
                });
            }
        }

        warn!(
            method = %method,
            path = %path,
            duration_us = match_start.elapsed().as_micros() as u64,
            "No route matched"
        );
        None
    }

    /// The ordered route list for a verb.
    #[must_use]
    pub fn routes(&self, method: &Method) -> &[Arc<Route>] {
        self.by_verb.get(method).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look up a page handler by static-asset namespace.
    #[must_use]
    pub fn namespace(&self, namespace: &str) -> Option<&Arc<HandlerType>> {
        self.namespaces.get(namespace)
    }

    /// The root handler the table was compiled from.
    #[must_use]
    pub fn root(&self) -> &Arc<HandlerType> {
        &self.root
    }

    /// JSON view of the table for the debug interface.
    #[must_use]
    pub fn dump(&self) -> serde_json::Value {
        let mut entries = Vec::new();
        for verb in SUPPORTED_VERBS {
            for route in self.routes(&verb) {
                entries.push(serde_json::json!({
                    "method": verb.as_str(),
                    "pattern": route.pattern,
                    "handler": route.owner.name(),
                    "target": route.target,
                }));
            }
        }
        serde_json::json!({ "routes": entries })
    }
}
