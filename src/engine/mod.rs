use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::json;
use tera::{Context, Tera, Value};
use tracing::debug;

use crate::collector::{RecordId, TwigDataCollector};
use crate::error::{error_chain, Result, ViewError};
use crate::loader::{template_dependencies, LoadedTemplate, TemplateLoader};
use crate::namespace::TEMPLATE_SUFFIX;

pub const ERROR_404_TEMPLATE: &str = "conga-twig:exception/error404";
pub const ERROR_500_TEMPLATE: &str = "conga-twig:exception/error500";

const BUILTIN_TEMPLATES: [(&str, &str); 2] = [
    (
        ERROR_404_TEMPLATE,
        include_str!("../../lib/resources/views/exception/error404.html.twig"),
    ),
    (
        ERROR_500_TEMPLATE,
        include_str!("../../lib/resources/views/exception/error500.html.twig"),
    ),
];

/// What the host's view subsystem renders through.
pub trait ViewEngine: Send + Sync {
    /// Render `template` with `data`. `profiler_id` ties the work to a request.
    fn render(&self, template: &str, data: &Value, profiler_id: Option<&str>) -> Result<String>;

    /// The template used for the host's error pages.
    fn error_template(&self, status: u16) -> &str;
}

/// Tera behind a namespace-aware loader.
///
/// Templates are read on first use, together with everything they extend,
/// include or import, and stay registered afterwards.
pub struct TwigViewEngine {
    tera: RwLock<Tera>,
    loader: Box<dyn TemplateLoader>,
    globals: Context,
    collector: Option<Arc<TwigDataCollector>>,
}

impl TwigViewEngine {
    pub fn new(mut tera: Tera, loader: impl TemplateLoader + 'static) -> Result<Self> {
        let builtins = BUILTIN_TEMPLATES.iter().flat_map(|(name, source)| {
            [
                (name.to_string(), *source),
                (format!("{name}{TEMPLATE_SUFFIX}"), *source),
            ]
        });
        tera.add_raw_templates(builtins)
            .map_err(|e| ViewError::TemplateParse {
                template: "conga-twig:exception".into(),
                source: e,
            })?;

        Ok(Self {
            tera: RwLock::new(tera),
            loader: Box::new(loader),
            globals: Context::new(),
            collector: None,
        })
    }

    /// Values available to every template, under their own names.
    pub fn with_globals(mut self, globals: &BTreeMap<String, Value>) -> Self {
        for (key, value) in globals {
            self.globals.insert(key, value);
        }
        self
    }

    pub fn with_collector(mut self, collector: Arc<TwigDataCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn collector(&self) -> Option<&Arc<TwigDataCollector>> {
        self.collector.as_ref()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tera> {
        self.tera.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tera> {
        self.tera.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutable access to the wrapped engine, e.g. to register a late filter.
    pub fn extend<R>(&self, f: impl FnOnce(&mut Tera) -> R) -> R {
        f(&mut self.write())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.read().get_template_names().any(|n| n == name)
    }

    /// Load `template` and its dependencies without rendering.
    pub fn load(&self, template: &str) -> Result<()> {
        let top = self.collector.as_deref().and_then(|c| c.add_template(template));
        self.load_with(template, top, None)
    }

    fn load_with(&self, template: &str, top: Option<RecordId>, profiler_id: Option<&str>) -> Result<()> {
        let collector = self.collector.as_deref();

        if self.is_loaded(template) {
            if let (Some(c), Some(id)) = (collector, top) {
                c.attach(id, profiler_id);
                c.load_finished(id, json!({ "id": template, "cached": true }), None);
            }
            return Ok(());
        }

        let mut pending = VecDeque::from([(template.to_string(), false, top)]);
        let mut seen = HashSet::from([template.to_string()]);
        let mut batch: Vec<(String, LoadedTemplate, Option<RecordId>)> = Vec::new();

        while let Some((location, optional, record)) = pending.pop_front() {
            let record = record.or_else(|| collector.and_then(|c| c.add_template(&location)));
            if let (Some(c), Some(id)) = (collector, record) {
                c.attach(id, profiler_id);
            }

            let loaded = match self.loader.load(&location) {
                Ok(loaded) => loaded,
                Err(_) if optional => {
                    debug!(location = %location, "optional include not found");
                    if let (Some(c), Some(id)) = (collector, record) {
                        c.discard(id);
                    }
                    continue;
                }
                Err(e) => {
                    let message = error_chain(&e);
                    if let (Some(c), Some(id)) = (collector, record) {
                        c.load_failed(id, &message);
                    }
                    // Nothing read so far gets registered.
                    self.finish_batch(&batch, Some(&message));
                    return Err(e);
                }
            };

            for dep in template_dependencies(&loaded.source) {
                if !seen.contains(&dep.name) && !self.is_loaded(&dep.name) {
                    seen.insert(dep.name.clone());
                    pending.push_back((dep.name, dep.optional, None));
                }
            }
            batch.push((location, loaded, record));
        }

        debug!(template, count = batch.len(), "registering templates");

        // Stage on a copy so a template that fails to parse leaves nothing half-registered.
        let result = {
            let mut tera = self.write();
            let mut staged = tera.clone();
            let added = staged.add_raw_templates(
                batch
                    .iter()
                    .map(|(name, loaded, _)| (name.as_str(), loaded.source.as_str())),
            );
            if added.is_ok() {
                *tera = staged;
            }
            added
        };

        match result {
            Ok(()) => {
                self.finish_batch(&batch, None);
                Ok(())
            }
            Err(e) => {
                let message = error_chain(&e);
                self.finish_batch(&batch, Some(&message));
                Err(ViewError::TemplateParse {
                    template: template.to_string(),
                    source: e,
                })
            }
        }
    }

    fn finish_batch(&self, batch: &[(String, LoadedTemplate, Option<RecordId>)], error: Option<&str>) {
        let Some(collector) = self.collector.as_deref() else {
            return;
        };
        for (name, loaded, record) in batch {
            let Some(id) = *record else {
                continue;
            };
            match error {
                Some(message) => collector.load_failed(id, message),
                None => collector.load_finished(
                    id,
                    json!({ "id": name, "path": loaded.path.to_string_lossy() }),
                    Some(&loaded.source),
                ),
            }
        }
    }

    fn context(&self, data: &Value) -> Result<Context> {
        let mut context = self.globals.clone();
        if !data.is_null() {
            let data = Context::from_value(data.clone())
                .map_err(|e| ViewError::InvalidContext { source: e })?;
            context.extend(data);
        }
        Ok(context)
    }

    /// Render `template` with `data`.
    ///
    /// With a collector attached, every template loaded along the way gets a
    /// record tied to `profiler_id`, and the rendered one also gets render
    /// timings. Errors are recorded and returned unchanged.
    pub fn render(&self, template: &str, data: &Value, profiler_id: Option<&str>) -> Result<String> {
        let collector = self.collector.as_deref();
        let top = collector.and_then(|c| c.add_template(template));

        self.load_with(template, top, profiler_id)?;

        if let (Some(c), Some(id)) = (collector, top) {
            c.render_start(id, profiler_id, data);
        }

        let result = self.context(data).and_then(|context| {
            self.read()
                .render(template, &context)
                .map_err(|e| ViewError::RenderError {
                    template: template.to_string(),
                    source: e,
                })
        });

        if let (Some(c), Some(id)) = (collector, top) {
            let error = result.as_ref().err().map(|e| error_chain(e));
            c.render_finished(id, error.as_deref());
        }

        result
    }

    /// Render the error page for `status`.
    pub fn render_error(&self, status: u16, message: &str, profiler_id: Option<&str>) -> Result<String> {
        let data = json!({ "status": status, "message": message });
        self.render(self.error_template(status), &data, profiler_id)
    }

    pub fn error_template(&self, status: u16) -> &'static str {
        match status {
            404 => ERROR_404_TEMPLATE,
            _ => ERROR_500_TEMPLATE,
        }
    }
}

impl ViewEngine for TwigViewEngine {
    fn render(&self, template: &str, data: &Value, profiler_id: Option<&str>) -> Result<String> {
        TwigViewEngine::render(self, template, data, profiler_id)
    }

    fn error_template(&self, status: u16) -> &str {
        TwigViewEngine::error_template(self, status)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::collector::ManualStopwatch;
    use crate::config::schema::{CaptureSetting, ProfilerOptions};
    use crate::config::ProfilerSetting;
    use crate::loader::{FileLoader, NamespaceLoader};
    use crate::namespace::{BundleResolver, VIEWS_SUBDIR};

    /// Serves templates from memory and counts reads.
    #[derive(Default)]
    struct MemoryLoader {
        templates: HashMap<String, String>,
        reads: AtomicUsize,
    }

    impl MemoryLoader {
        fn with(mut self, name: &str, source: &str) -> Self {
            self.templates.insert(name.into(), source.into());
            self
        }
    }

    impl TemplateLoader for MemoryLoader {
        fn load(&self, location: &str) -> Result<LoadedTemplate> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match self.templates.get(location) {
                Some(source) => Ok(LoadedTemplate {
                    location: location.into(),
                    path: location.into(),
                    source: source.clone(),
                }),
                None => Err(ViewError::TemplateNotFound {
                    location: location.into(),
                    path: location.into(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                }),
            }
        }
    }

    fn engine(loader: MemoryLoader) -> TwigViewEngine {
        TwigViewEngine::new(Tera::default(), loader).unwrap()
    }

    fn profiled(loader: MemoryLoader) -> (TwigViewEngine, Arc<TwigDataCollector>) {
        profiled_with(loader, ProfilerSetting::Flag(true))
    }

    fn profiled_with(
        loader: MemoryLoader,
        setting: ProfilerSetting,
    ) -> (TwigViewEngine, Arc<TwigDataCollector>) {
        let clock = Arc::new(ManualStopwatch::new(10));
        let collector = Arc::new(TwigDataCollector::with_stopwatch(setting, clock));
        (engine(loader).with_collector(collector.clone()), collector)
    }

    #[test]
    fn renders_with_data() {
        let engine = engine(MemoryLoader::default().with("hello", "Hello {{ name }}"));
        let html = engine.render("hello", &json!({"name": "world"}), None).unwrap();
        assert_eq!(html, "Hello world");
    }

    #[test]
    fn loads_parents_and_includes() {
        let loader = MemoryLoader::default()
            .with("demo:layout", "<main>{% block body %}{% endblock %}</main>")
            .with("demo:nav", "<nav/>")
            .with(
                "demo:page",
                r#"{% extends "demo:layout" %}{% block body %}{% include "demo:nav" %}page{% endblock %}"#,
            );
        let engine = engine(loader);
        let html = engine.render("demo:page", &Value::Null, None).unwrap();
        assert_eq!(html, "<main><nav/>page</main>");
        assert!(engine.is_loaded("demo:layout"));
        assert!(engine.is_loaded("demo:nav"));
    }

    #[test]
    fn templates_are_read_once() {
        let loader = Arc::new(MemoryLoader::default().with("t", "x"));
        let engine = TwigViewEngine::new(Tera::default(), loader.clone()).unwrap();
        engine.render("t", &Value::Null, None).unwrap();
        engine.render("t", &Value::Null, None).unwrap();
        assert_eq!(loader.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_optional_include_is_ignored() {
        let loader = MemoryLoader::default()
            .with("t", r#"a{% include "gone" ignore missing %}b"#);
        let (engine, collector) = profiled(loader);
        assert_eq!(engine.render("t", &Value::Null, Some("req")).unwrap(), "ab");

        let data = collector.collect("req").unwrap();
        assert_eq!(data.errors_found, 0);
        let locations: Vec<&str> = data.templates.iter().map(|t| t.location.as_str()).collect();
        assert_eq!(locations, vec!["t"]);
    }

    #[test]
    fn tags_in_comments_and_raw_blocks_are_not_loaded() {
        let loader = Arc::new(
            MemoryLoader::default()
                .with("commented", r#"a{# {% include "old" %} #}b"#)
                .with("raw", r#"{% raw %}{% include "doc" %}{% endraw %}"#),
        );
        let engine = TwigViewEngine::new(Tera::default(), loader.clone()).unwrap();
        assert_eq!(engine.render("commented", &Value::Null, None).unwrap(), "ab");
        assert_eq!(
            engine.render("raw", &Value::Null, None).unwrap(),
            r#"{% include "doc" %}"#
        );
        assert_eq!(loader.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_dependency_marks_the_whole_batch_failed() {
        let loader = MemoryLoader::default().with("t", r#"{% include "gone" %}"#);
        let capture_all = ProfilerSetting::Detailed(ProfilerOptions {
            enabled: true,
            capture: Some(CaptureSetting::Flag(true)),
            ttl_secs: 0,
        });
        let (engine, collector) = profiled_with(loader, capture_all);
        let err = engine.render("t", &Value::Null, Some("req")).unwrap_err();
        assert!(matches!(err, ViewError::TemplateNotFound { location, .. } if location == "gone"));
        assert!(!engine.is_loaded("t"));

        let data = collector.collect("req").unwrap();
        assert_eq!(data.errors_found, 2);
        let top = &data.templates[0];
        assert_eq!(top.location, "t");
        assert!(top.error.as_deref().unwrap().contains("gone"));
        assert_eq!(top.source, None);
        assert_eq!(top.params, None);
    }

    #[test]
    fn missing_template_is_an_error() {
        let engine = engine(MemoryLoader::default());
        let err = engine.render("demo:nope", &Value::Null, None).unwrap_err();
        assert!(matches!(err, ViewError::TemplateNotFound { location, .. } if location == "demo:nope"));
    }

    #[test]
    fn parse_error_leaves_engine_untouched() {
        let loader = MemoryLoader::default()
            .with("ok", "fine")
            .with("broken", r#"{% include "ok" %}{% if %}"#);
        let engine = engine(loader);
        let err = engine.render("broken", &Value::Null, None).unwrap_err();
        assert!(matches!(err, ViewError::TemplateParse { .. }));
        assert!(!engine.is_loaded("ok"));
        assert_eq!(engine.render("ok", &Value::Null, None).unwrap(), "fine");
    }

    #[test]
    fn non_object_data_is_rejected() {
        let engine = engine(MemoryLoader::default().with("t", "x"));
        let err = engine.render("t", &json!([1, 2]), None).unwrap_err();
        assert!(matches!(err, ViewError::InvalidContext { .. }));
    }

    #[test]
    fn globals_are_available_and_overridable() {
        let mut globals = BTreeMap::new();
        globals.insert("site".to_string(), json!("Demo"));
        let engine = engine(MemoryLoader::default().with("t", "{{ site }}"))
            .with_globals(&globals);
        assert_eq!(engine.render("t", &Value::Null, None).unwrap(), "Demo");
        assert_eq!(
            engine.render("t", &json!({"site": "Other"}), None).unwrap(),
            "Other"
        );
    }

    #[test]
    fn error_templates_are_builtin() {
        let engine = engine(MemoryLoader::default());
        assert_eq!(engine.error_template(404), ERROR_404_TEMPLATE);
        assert_eq!(engine.error_template(503), ERROR_500_TEMPLATE);
        assert_eq!(engine.error_template(418), ERROR_500_TEMPLATE);
        let html = engine.render_error(404, "No such page", None).unwrap();
        assert!(html.contains("No such page"));
        let html = engine.render_error(500, "Broken", None).unwrap();
        assert!(html.contains("500 - Server Error"));
        assert!(engine.is_loaded("conga-twig:exception/error500.html.twig"));
    }

    #[test]
    fn extend_registers_late_functions() {
        let engine = engine(MemoryLoader::default().with("t", "{{ answer() }}"));
        engine.extend(|tera| {
            tera.register_function("answer", |_: &HashMap<String, Value>| Ok(json!(42)));
        });
        assert_eq!(engine.render("t", &Value::Null, None).unwrap(), "42");
    }

    #[test]
    fn profiler_records_every_loaded_template() {
        let loader = MemoryLoader::default()
            .with("demo:layout", "{% block body %}{% endblock %}")
            .with("demo:page", r#"{% extends "demo:layout" %}{% block body %}hi{% endblock %}"#);
        let (engine, collector) = profiled(loader);

        engine.render("demo:page", &Value::Null, Some("req-1")).unwrap();
        engine.render("demo:page", &Value::Null, Some("req-2")).unwrap();

        let first = collector.collect("req-1").unwrap();
        let locations: Vec<&str> = first.templates.iter().map(|t| t.location.as_str()).collect();
        assert_eq!(locations, vec!["demo:page", "demo:layout"]);
        assert_eq!(first.errors_found, 0);

        let second = collector.collect("req-2").unwrap();
        assert_eq!(second.templates.len(), 1);
        assert_eq!(collector.pending(), 0);
    }

    #[test]
    fn profiler_records_render_errors_and_returns_them() {
        let (engine, collector) = profiled(MemoryLoader::default().with("t", "{{ missing }}"));
        let err = engine.render("t", &Value::Null, Some("req")).unwrap_err();
        assert!(matches!(err, ViewError::RenderError { .. }));

        let data = collector.collect("req").unwrap();
        assert_eq!(data.errors_found, 1);
        assert!(data.templates[0].error.as_deref().unwrap().contains("missing"));
    }

    #[test]
    fn profiler_records_load_errors() {
        let (engine, collector) = profiled(MemoryLoader::default());
        assert!(engine.render("demo:nope", &Value::Null, Some("req")).is_err());
        let data = collector.collect("req").unwrap();
        assert_eq!(data.templates.len(), 1);
        assert_eq!(data.errors_found, 1);
    }

    #[test]
    fn renders_namespaced_files_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let views = tmp.path().join("demo").join(VIEWS_SUBDIR);
        std::fs::create_dir_all(views.join("layouts")).unwrap();
        std::fs::write(
            views.join("layouts/base.html.twig"),
            "[{% block body %}{% endblock %}]",
        )
        .unwrap();
        std::fs::write(
            views.join("index.html.twig"),
            r#"{% extends "demo:layouts/base" %}{% block body %}{{ msg }}{% endblock %}"#,
        )
        .unwrap();

        let resolver = BundleResolver::default().with_bundle("demo", tmp.path().join("demo"));
        let loader = NamespaceLoader::new(FileLoader::new(Path::new("/")), Arc::new(resolver));
        let engine = TwigViewEngine::new(Tera::default(), loader).unwrap();

        let html = engine.render("demo:index", &json!({"msg": "ok"}), None).unwrap();
        assert_eq!(html, "[ok]");
    }
}
