//! The slice of the host framework's service container that the view engine
//! consumes and registers itself into.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tera::Value;

use crate::collector::TwigDataCollector;
use crate::engine::TwigViewEngine;
use crate::namespace::NamespaceResolver;
use crate::registrar::TwigExtension;

/// Where the view engine is registered for the host's view subsystem.
pub const VIEW_ENGINE_SERVICE: &str = "conga.view.engine.twig";
/// Where the template collector is registered for the profiler.
pub const COLLECTOR_SERVICE: &str = "profiler.collector.twig";
/// The namespace resolution service consumed by the loader.
pub const RESOLVER_SERVICE: &str = "namespace.resolver";

/// Template extension used by every view (`html.twig`).
pub const VIEW_ENGINE_PARAMETER: &str = "app.view.engine";
/// Host error templates, keyed by group then by name.
pub const TEMPLATES_PARAMETER: &str = "conga.templates";

/// A service registered on the container.
#[derive(Clone)]
pub enum Service {
    Extension(Arc<dyn TwigExtension>),
    Resolver(Arc<dyn NamespaceResolver>),
    ViewEngine(Arc<TwigViewEngine>),
    Collector(Arc<TwigDataCollector>),
}

/// Associates a service with a tag name, a priority and free-form parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDescriptor {
    pub name: String,
    pub service_id: String,
    pub priority: i64,
    pub parameters: BTreeMap<String, String>,
}

impl TagDescriptor {
    pub fn new(name: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_id: service_id.into(),
            priority: 0,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_method(self, method: impl Into<String>) -> Self {
        self.with_parameter("method", method)
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn method(&self) -> Option<&str> {
        self.parameter("method")
    }
}

/// Stable sort, highest priority first. Equal priorities keep discovery order.
pub fn sort_by_priority(tags: &mut [TagDescriptor]) {
    tags.sort_by(|a, b| b.priority.cmp(&a.priority));
}

#[derive(Default, Clone)]
pub struct Container {
    parameters: BTreeMap<String, Value>,
    services: HashMap<String, Service>,
    tags: Vec<TagDescriptor>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: impl Into<String>, service: Service) {
        self.services.insert(id.into(), service);
    }

    pub fn has(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Service> {
        self.services.get(id)
    }

    pub fn extension(&self, id: &str) -> Option<Arc<dyn TwigExtension>> {
        match self.services.get(id)? {
            Service::Extension(extension) => Some(extension.clone()),
            _ => None,
        }
    }

    pub fn resolver(&self, id: &str) -> Option<Arc<dyn NamespaceResolver>> {
        match self.services.get(id)? {
            Service::Resolver(resolver) => Some(resolver.clone()),
            _ => None,
        }
    }

    pub fn view_engine(&self, id: &str) -> Option<Arc<TwigViewEngine>> {
        match self.services.get(id)? {
            Service::ViewEngine(engine) => Some(engine.clone()),
            _ => None,
        }
    }

    pub fn collector(&self, id: &str) -> Option<Arc<TwigDataCollector>> {
        match self.services.get(id)? {
            Service::Collector(collector) => Some(collector.clone()),
            _ => None,
        }
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.parameters.insert(name.into(), value);
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn get_parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    pub fn get_parameter_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.parameters.get_mut(name)
    }

    pub fn tag(&mut self, tag: TagDescriptor) {
        self.tags.push(tag);
    }

    /// Tags with this name, in the order they were added.
    pub fn get_tags_by_name(&self, name: &str) -> Vec<TagDescriptor> {
        self.tags.iter().filter(|t| t.name == name).cloned().collect()
    }
}
