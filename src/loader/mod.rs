use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use regex_lite::Regex;
use tracing::debug;

use crate::error::{Result, ViewError};
use crate::namespace::{normalize_namespace, NamespaceResolver, VIEWS_SUBDIR};

/// Template source read by a loader.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    /// The location that was requested.
    pub location: String,
    /// Where the source was read from.
    pub path: PathBuf,
    pub source: String,
}

/// Strategy for turning a template location into template source.
pub trait TemplateLoader: Send + Sync {
    fn load(&self, location: &str) -> Result<LoadedTemplate>;
}

impl<L: TemplateLoader + ?Sized> TemplateLoader for Arc<L> {
    fn load(&self, location: &str) -> Result<LoadedTemplate> {
        (**self).load(location)
    }
}

/// Reads templates from the filesystem, relative to `root`.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateLoader for FileLoader {
    fn load(&self, location: &str) -> Result<LoadedTemplate> {
        let path = self.root.join(location);
        let source = std::fs::read_to_string(&path).map_err(|e| ViewError::TemplateNotFound {
            location: location.to_string(),
            path: path.clone(),
            source: e,
        })?;
        Ok(LoadedTemplate {
            location: location.to_string(),
            path,
            source,
        })
    }
}

/// Rewrites namespaced locations to filesystem paths before delegating.
pub struct NamespaceLoader<L> {
    inner: L,
    resolver: Arc<dyn NamespaceResolver>,
}

impl<L: TemplateLoader> NamespaceLoader<L> {
    pub fn new(inner: L, resolver: Arc<dyn NamespaceResolver>) -> Self {
        Self { inner, resolver }
    }

    /// The location the inner loader will be asked for.
    pub fn rewrite(&self, location: &str) -> String {
        let Some(namespace) = normalize_namespace(location) else {
            return location.to_string();
        };

        // An unresolvable namespace is forwarded as-is and fails downstream.
        match self.resolver.resolve_with_subpath(&namespace, VIEWS_SUBDIR) {
            Some(path) => path.to_string_lossy().into_owned(),
            None => namespace,
        }
    }
}

impl<L: TemplateLoader> TemplateLoader for NamespaceLoader<L> {
    fn load(&self, location: &str) -> Result<LoadedTemplate> {
        let rewritten = self.rewrite(location);
        if rewritten != location {
            debug!(location, resolved = %rewritten, "resolved namespaced template");
        }
        let mut loaded = self.inner.load(&rewritten)?;
        loaded.location = location.to_string();
        Ok(loaded)
    }
}

/// A template referenced from another template's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    /// `include ... ignore missing`: the template renders without it.
    pub optional: bool,
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{%-?\s*(extends|include|import)\s+(.*?)\s*-?%\}")
            .expect("dependency tag pattern is valid")
    })
}

/// `{# .. #}` comments and `{% raw %} .. {% endraw %}` blocks: Tera never
/// evaluates tags inside them.
fn inert_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)\{#.*?#\}|\{%-?\s*raw\s*-?%\}.*?\{%-?\s*endraw\s*-?%\}")
            .expect("comment and raw block pattern is valid")
    })
}

fn string_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#""([^"]*)"|'([^']*)'|`([^`]*)`"#).expect("string literal pattern is valid")
    })
}

/// Templates named by `extends`, `include` and `import` tags in `source`.
///
/// Only string literals are picked up; names built from expressions are left
/// for Tera to report at render time.
pub fn template_dependencies(source: &str) -> Vec<Dependency> {
    let mut deps: Vec<Dependency> = Vec::new();
    let source = inert_pattern().replace_all(source, "");

    for tag in tag_pattern().captures_iter(&source) {
        let keyword = &tag[1];
        let args = &tag[2];
        let optional = keyword == "include" && args.contains("ignore missing");

        // `import "macros.html" as m` names one file; `include [..]` may name several.
        let names = string_pattern().captures_iter(args).filter_map(|lit| {
            lit.get(1)
                .or_else(|| lit.get(2))
                .or_else(|| lit.get(3))
                .map(|m| m.as_str().to_string())
        });
        let names: Vec<String> = if keyword == "include" {
            names.collect()
        } else {
            names.take(1).collect()
        };

        for name in names {
            if name.is_empty() || deps.iter().any(|d| d.name == name) {
                continue;
            }
            deps.push(Dependency { name, optional });
        }
    }

    deps
}
