pub mod check;
pub mod collector;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod loader;
pub mod namespace;
pub mod registrar;

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tera::{Tera, Value};
use tracing::debug;

use crate::collector::TwigDataCollector;
use crate::config::{LoadedConfig, TwigConfig};
use crate::container::{
    Container, Service, COLLECTOR_SERVICE, RESOLVER_SERVICE, TEMPLATES_PARAMETER,
    VIEW_ENGINE_PARAMETER, VIEW_ENGINE_SERVICE,
};
use crate::engine::{TwigViewEngine, ERROR_404_TEMPLATE, ERROR_500_TEMPLATE};
use crate::error::{Result, ViewError};
use crate::loader::{FileLoader, NamespaceLoader};
use crate::namespace::BundleResolver;
use crate::registrar::{register_extensions, run_initializers, ExtensionCategory};

/// Set up the view engine and register it (and the collector, if profiling)
/// on the container.
///
/// Non-namespaced template locations are read relative to `root`. The
/// `namespace.resolver` service must already be registered.
pub fn boot(container: &mut Container, config: &TwigConfig, root: &Path) -> Result<Arc<TwigViewEngine>> {
    debug!("[conga-tera] - setting up tera");

    // 1. Build the engine
    let mut tera = Tera::default();
    if config.autoescape {
        tera.autoescape_on(vec![""]);
    } else {
        tera.autoescape_on(vec![]);
    }

    // 2. Register user defined tags, filters and functions
    for category in ExtensionCategory::REGISTERED {
        let applied = register_extensions(container, category, &mut tera)?;
        debug!(category = category.tag_name(), applied, "registered extensions");
    }

    // 3. Let other services hook in; failures here never stop boot
    let outcome = run_initializers(container, &mut tera);
    debug!(completed = outcome.completed, "ran twig.initialize hooks");

    // 4. Profiler
    let collector = config
        .profiler
        .as_ref()
        .filter(|p| p.is_enabled())
        .map(|p| Arc::new(TwigDataCollector::new(p.clone())));

    // 5. Namespace-aware loader and the engine itself
    let resolver = container
        .resolver(RESOLVER_SERVICE)
        .ok_or_else(|| ViewError::MissingService {
            id: RESOLVER_SERVICE.into(),
        })?;
    let loader = NamespaceLoader::new(FileLoader::new(root), resolver);

    debug!("[conga-tera] - setting tera as view engine");
    let mut engine = TwigViewEngine::new(tera, loader)?.with_globals(&config.options);
    if let Some(collector) = &collector {
        engine = engine.with_collector(collector.clone());
        container.set(COLLECTOR_SERVICE, Service::Collector(collector.clone()));
    }
    let engine = Arc::new(engine);
    container.set(VIEW_ENGINE_SERVICE, Service::ViewEngine(engine.clone()));

    // 6. Tell the host which extension views use and where the error pages live
    container.set_parameter(VIEW_ENGINE_PARAMETER, json!("html.twig"));
    if let Some(Value::Object(groups)) = container.get_parameter_mut(TEMPLATES_PARAMETER) {
        groups.insert(
            "exception".into(),
            json!({
                "error404": { "namespace": ERROR_404_TEMPLATE },
                "error500": { "namespace": ERROR_500_TEMPLATE },
            }),
        );
    }

    Ok(engine)
}

/// Boot from a loaded conga.toml on a fresh container, resolving namespaces
/// against its `[bundles]`.
pub fn boot_from_config(loaded: &LoadedConfig) -> Result<(Container, Arc<TwigViewEngine>)> {
    let mut container = Container::new();
    let resolver = BundleResolver::new(loaded.config.bundles.clone());
    container.set(RESOLVER_SERVICE, Service::Resolver(Arc::new(resolver)));
    container.set_parameter(TEMPLATES_PARAMETER, json!({}));

    let engine = boot(&mut container, &loaded.config.twig, &loaded.root)?;
    Ok((container, engine))
}
