//! Templating and locale collaborator boundary.
//!
//! The engine is consulted by the static resolver for template-producible
//! assets and by the dispatcher for `Accept-Language` negotiation; nothing
//! else in the core depends on how templates are actually rendered. The
//! default implementation is backed by minijinja.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use minijinja::Environment;
use serde_json::Value;

/// Template loading or rendering failure.
#[derive(Debug)]
pub enum TemplateError {
    /// No template with this name exists under the handler's template dir
    NotFound { name: String },
    /// The template exists but failed to render
    Render { name: String, detail: String },
    Io(io::Error),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::NotFound { name } => write!(f, "template not found: {name}"),
            TemplateError::Render { name, detail } => {
                write!(f, "template '{name}' failed to render: {detail}")
            }
            TemplateError::Io(e) => write!(f, "template io error: {e}"),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<io::Error> for TemplateError {
    fn from(e: io::Error) -> Self {
        TemplateError::Io(e)
    }
}

/// Rendering and locale negotiation, as seen from the dispatch core.
pub trait TemplateEngine: Send + Sync {
    /// Render the template file `name` under `dir` with the given context.
    fn render(&self, dir: &Path, name: &str, ctx: &Value) -> Result<String, TemplateError>;

    /// Pick the closest supported locale for an `Accept-Language` header.
    ///
    /// Returns `None` when no candidate matches; callers fall back to the
    /// configured default language.
    fn negotiate_locale(&self, accept_language: &str, available: &[String]) -> Option<String>;
}

/// Default engine: one-shot minijinja rendering of on-disk templates.
#[derive(Default)]
pub struct MiniJinjaEngine;

impl MiniJinjaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TemplateEngine for MiniJinjaEngine {
    fn render(&self, dir: &Path, name: &str, ctx: &Value) -> Result<String, TemplateError> {
        let path = dir.join(name);
        if !path.is_file() {
            return Err(TemplateError::NotFound {
                name: name.to_string(),
            });
        }
        let source = fs::read_to_string(&path)?;
        let mut env = Environment::new();
        env.add_template(name, &source)
            .map_err(|e| TemplateError::Render {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
        let tmpl = env
            .get_template(name)
            .map_err(|e| TemplateError::Render {
                name: name.to_string(),
                detail: e.to_string(),
            })?;
        tmpl.render(ctx).map_err(|e| TemplateError::Render {
            name: name.to_string(),
            detail: e.to_string(),
        })
    }

    fn negotiate_locale(&self, accept_language: &str, available: &[String]) -> Option<String> {
        for candidate in accept_language.split(',') {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                continue;
            }
            // drop any ;q= weight and assume the client ordered sanely
            let candidate = candidate.split(';').next().unwrap_or(candidate);
            let candidate = candidate.replace('-', "_");
            let parts: Vec<&str> = candidate.split('_').collect();
            let normalized = match parts.len() {
                1 => parts[0].to_lowercase(),
                2 => format!("{}_{}", parts[0].to_lowercase(), parts[1].to_uppercase()),
                _ => continue,
            };
            if available.iter().any(|a| *a == normalized) {
                return Some(normalized);
            }
            let primary = parts[0].to_lowercase();
            if available.iter().any(|a| *a == primary) {
                return Some(primary);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_negotiate_exact_region_match() {
        let engine = MiniJinjaEngine::new();
        let locales = available(&["de_AT", "en"]);
        assert_eq!(
            engine.negotiate_locale("de-AT,de;q=0.8", &locales),
            Some("de_AT".to_string())
        );
    }

    #[test]
    fn test_negotiate_falls_back_to_primary_tag() {
        let engine = MiniJinjaEngine::new();
        let locales = available(&["de", "en"]);
        assert_eq!(
            engine.negotiate_locale("de-CH", &locales),
            Some("de".to_string())
        );
    }

    #[test]
    fn test_negotiate_normalizes_casing() {
        let engine = MiniJinjaEngine::new();
        let locales = available(&["pt_BR"]);
        assert_eq!(
            engine.negotiate_locale("PT-br", &locales),
            Some("pt_BR".to_string())
        );
    }

    #[test]
    fn test_negotiate_no_match() {
        let engine = MiniJinjaEngine::new();
        let locales = available(&["en"]);
        assert_eq!(engine.negotiate_locale("fr", &locales), None);
        assert_eq!(engine.negotiate_locale("", &locales), None);
    }

    #[test]
    fn test_render_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "<h1>Hello {{ name }}!</h1>").unwrap();
        let engine = MiniJinjaEngine::new();
        let out = engine
            .render(dir.path(), "hello.html", &serde_json::json!({"name": "World"}))
            .unwrap();
        assert_eq!(out, "<h1>Hello World!</h1>");
    }

    #[test]
    fn test_render_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MiniJinjaEngine::new();
        assert!(matches!(
            engine.render(dir.path(), "nope.html", &serde_json::json!({})),
            Err(TemplateError::NotFound { .. })
        ));
    }
}
