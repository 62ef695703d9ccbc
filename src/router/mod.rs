//! # Router Module
//!
//! Route compilation and path matching for the handler tree.
//!
//! ## Overview
//!
//! The router is responsible for:
//! - Walking the handler tree (including mounted sub-trees) and compiling
//!   every route annotation into a matchable [`Route`]
//! - Ordering the per-verb route lists so more specific patterns are tried
//!   first
//! - Matching incoming requests and binding path variables
//! - Rejecting conflicting or reserved patterns at startup
//!
//! ## Architecture
//!
//! Routing is a two-phase process:
//!
//! 1. **Compilation**: at startup, [`RouteTable::compile`] recursively
//!    visits the handler tree. Mount prefixes are concatenated onto local
//!    path annotations, trailing slashes are normalized away, and each
//!    pattern (e.g. `/pets/<id>`) is converted into an anchored regex that
//!    matches and extracts path variables.
//!
//! 2. **Matching**: per request, the dispatcher scans the verb's compiled
//!    list in table order and takes the first pattern that matches.
//!
//! ## Ordering
//!
//! Each verb's list is sorted by descending lexicographic order of the
//! full pattern string. Longer literal prefixes therefore sort ahead of
//! shorter ones and ahead of variable segments (whose `<` placeholder
//! sorts low), approximating "most specific match wins" without a
//! dedicated specificity metric. This is a faithful string sort, quirks
//! included; it is not a general longest-prefix guarantee.

mod core;

pub use core::{
    normalize_request_path, CompileError, ParamVec, Route, RouteMatch, RouteTable,
    MAX_INLINE_PARAMS, SUPPORTED_VERBS,
};
