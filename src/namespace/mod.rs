use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory, relative to a bundle root, holding its templates.
pub const VIEWS_SUBDIR: &str = "lib/resources/views";

/// File suffix appended to namespaced template paths that lack one.
pub const TEMPLATE_SUFFIX: &str = ".html.twig";

/// Rewrite a location into a `bundle:path.html.twig` namespace path.
///
/// Returns `None` when the location is not a namespace path (no `:`, or more
/// than one). Directory context that ended up in front of the bundle name is
/// dropped, so `foo/bar/my-bundle:page` becomes `my-bundle:page.html.twig`.
pub fn normalize_namespace(location: &str) -> Option<String> {
    let mut parts = location.split(':');
    let (Some(left), Some(right), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };

    let bundle = left.rsplit('/').next().unwrap_or(left);
    let mut namespace = format!("{bundle}:{right}");

    if !has_template_suffix(&namespace) {
        namespace.push_str(TEMPLATE_SUFFIX);
    }

    Some(namespace)
}

fn has_template_suffix(path: &str) -> bool {
    path.len() >= TEMPLATE_SUFFIX.len()
        && path
            .get(path.len() - TEMPLATE_SUFFIX.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(TEMPLATE_SUFFIX))
}

/// Split a namespace path into its bundle name and sub path.
pub fn split_namespace(namespace: &str) -> Option<(&str, &str)> {
    let (bundle, path) = namespace.split_once(':')?;
    if bundle.is_empty() || path.contains(':') {
        return None;
    }
    Some((bundle, path))
}

/// Maps a namespace onto the filesystem.
pub trait NamespaceResolver: Send + Sync {
    /// Resolve `bundle:path` to `<bundle root>/<subdir>/<path>`.
    fn resolve_with_subpath(&self, namespace: &str, subdir: &str) -> Option<PathBuf>;
}

/// Resolves namespaces against a fixed table of bundle roots.
#[derive(Debug, Clone, Default)]
pub struct BundleResolver {
    bundles: BTreeMap<String, PathBuf>,
}

impl BundleResolver {
    pub fn new(bundles: BTreeMap<String, PathBuf>) -> Self {
        Self { bundles }
    }

    pub fn with_bundle(mut self, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.bundles.insert(name.into(), root.into());
        self
    }

    pub fn bundles(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.bundles.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }
}

impl NamespaceResolver for BundleResolver {
    fn resolve_with_subpath(&self, namespace: &str, subdir: &str) -> Option<PathBuf> {
        let (bundle, path) = split_namespace(namespace)?;
        let root = self.bundles.get(bundle)?;
        Some(root.join(subdir).join(path.trim_start_matches('/')))
    }
}
