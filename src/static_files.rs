//! Static and template-producible asset resolution.
//!
//! Assets live in per-handler namespaces. Resolution for a handler first
//! looks for a literal file under its own static directory, then for a
//! `static/<name>` template under its template directory, and finally
//! falls back breadth-first across the handler's declared parents: a
//! queue-based traversal that consults each parent in declaration order
//! and enqueues *its* parents when it fails too. Declaration order is
//! fixed on every node, so resolution is deterministic across runs.
//!
//! Every resolved asset is content-hashed; the first five hex characters
//! become the `?v=` cache-busting token in asset URLs. A failed or empty
//! resolution degrades to `?v=ERR` instead of failing the enclosing page
//! render, so a broken asset reference produces a dead link, not a crash.

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::handler::HandlerType;
use crate::templating::{TemplateEngine, TemplateError};

/// A successfully resolved asset.
///
/// The namespace is the *originating* handler's, not the providing
/// parent's: asset URLs always point back at the namespace the reference
/// came from, so they re-resolve through the same parent traversal.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    pub namespace: String,
    pub name: String,
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of the content
    pub digest: String,
}

impl ResolvedAsset {
    /// The cache-busting token: first five hex characters of the digest.
    #[must_use]
    pub fn version_token(&self) -> &str {
        &self.digest[..5]
    }
}

/// Asset resolution failure, distinguishable from a route miss.
#[derive(Debug)]
pub enum AssetError {
    /// Neither the handler nor any ancestor provides the asset
    NotFound { namespace: String, name: String },
    /// A template-producible asset exists but failed to render
    Template {
        namespace: String,
        name: String,
        source: TemplateError,
    },
    Io(io::Error),
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::NotFound { namespace, name } => {
                write!(f, "asset not found: {namespace}:{name}")
            }
            AssetError::Template {
                namespace,
                name,
                source,
            } => write!(f, "asset {namespace}:{name} failed to render: {source}"),
            AssetError::Io(e) => write!(f, "asset io error: {e}"),
        }
    }
}

impl std::error::Error for AssetError {}

/// Build the asset URL wire format:
/// `/static/<namespace>/<name>?v=<token>`, or `?v=ERR` without a token.
#[must_use]
pub fn asset_url(namespace: &str, name: &str, token: Option<&str>) -> String {
    match token {
        Some(t) => format!("/static/{namespace}/{name}?v={t}"),
        None => format!("/static/{namespace}/{name}?v=ERR"),
    }
}

/// Map a relative asset name safely below a base directory.
///
/// Rejects parent-directory and absolute components so an asset name can
/// never escape its namespace.
fn map_path(base: &Path, name: &str) -> Option<PathBuf> {
    let mut pb = base.to_path_buf();
    for comp in Path::new(name).components() {
        match comp {
            Component::Normal(s) => pb.push(s),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(pb)
}

/// Guess a content type from the asset name's extension.
#[must_use]
pub fn content_type(name: &str) -> &'static str {
    match Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Resolves assets across a handler's namespace and ancestor namespaces.
pub struct StaticResolver {
    engine: Arc<dyn TemplateEngine>,
}

impl StaticResolver {
    pub fn new(engine: Arc<dyn TemplateEngine>) -> Self {
        Self { engine }
    }

    /// Resolve `name` for `handler`: own literal file, own template, then
    /// breadth-first across declared parents.
    pub fn resolve(
        &self,
        handler: &Arc<HandlerType>,
        name: &str,
    ) -> Result<ResolvedAsset, AssetError> {
        let namespace = handler.namespace().to_string();
        let not_found = || AssetError::NotFound {
            namespace: handler.namespace().to_string(),
            name: name.to_string(),
        };
        if name.is_empty() || map_path(Path::new(""), name).is_none() {
            return Err(not_found());
        }

        if let Some(bytes) = self.local(handler, &namespace, name)? {
            return Ok(Self::hashed(namespace, name, bytes));
        }

        let mut queue: VecDeque<Arc<HandlerType>> =
            handler.parents().iter().map(Arc::clone).collect();
        while let Some(next) = queue.pop_front() {
            debug!(
                namespace = %namespace,
                asset = %name,
                visiting = next.name(),
                "Asset parent lookup"
            );
            if let Some(bytes) = self.local(&next, &namespace, name)? {
                return Ok(Self::hashed(namespace, name, bytes));
            }
            queue.extend(next.parents().iter().map(Arc::clone));
        }

        Err(not_found())
    }

    /// Asset URL for templating; never fails. A broken reference degrades
    /// to a `?v=ERR` dead link.
    #[must_use]
    pub fn url_for(&self, handler: &Arc<HandlerType>, name: &str) -> String {
        match self.resolve(handler, name) {
            Ok(asset) if !asset.bytes.is_empty() => {
                asset_url(&asset.namespace, name, Some(asset.version_token()))
            }
            Ok(asset) => asset_url(&asset.namespace, name, None),
            Err(err) => {
                warn!(
                    namespace = handler.namespace(),
                    asset = %name,
                    error = %err,
                    "Asset reference did not resolve, emitting dead link"
                );
                asset_url(handler.namespace(), name, None)
            }
        }
    }

    /// Look for `name` in one handler's own namespace: literal file first,
    /// template-producible asset second.
    fn local(
        &self,
        handler: &Arc<HandlerType>,
        origin_namespace: &str,
        name: &str,
    ) -> Result<Option<Vec<u8>>, AssetError> {
        if let Some(dir) = handler.static_dir() {
            if let Some(path) = map_path(dir, name) {
                match fs::read(&path) {
                    Ok(bytes) => return Ok(Some(bytes)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) if e.kind() == io::ErrorKind::IsADirectory => {}
                    Err(e) => return Err(AssetError::Io(e)),
                }
            }
        }

        if let Some(dir) = handler.template_dir() {
            let template = format!("static/{name}");
            match self.engine.render(dir, &template, &Value::Object(Default::default())) {
                Ok(rendered) => return Ok(Some(rendered.into_bytes())),
                Err(TemplateError::NotFound { .. }) => {}
                Err(source) => {
                    return Err(AssetError::Template {
                        namespace: origin_namespace.to_string(),
                        name: name.to_string(),
                        source,
                    })
                }
            }
        }

        Ok(None)
    }

    fn hashed(namespace: String, name: &str, bytes: Vec<u8>) -> ResolvedAsset {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        ResolvedAsset {
            namespace,
            name: name.to_string(),
            bytes,
            digest,
        }
    }
}
