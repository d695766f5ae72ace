use tera::Tera;
use tracing::{debug, error};

use crate::container::{sort_by_priority, Container, TagDescriptor};
use crate::error::{error_chain, Result};

/// A service that customizes the template engine.
///
/// `register` is the entry point. Tags may name a `method`; providers that
/// answer to it through `call` get that instead.
pub trait TwigExtension: Send + Sync {
    fn register(&self, container: &Container, tera: &mut Tera) -> Result<()>;

    /// Run the hook named `method`, or `None` if this provider has no such hook.
    fn call(&self, method: &str, container: &Container, tera: &mut Tera) -> Option<Result<()>> {
        let _ = (method, container, tera);
        None
    }
}

/// The kinds of tagged services the registrar looks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionCategory {
    /// Tera has no custom tags; these providers register tests and shared macros.
    Tag,
    Filter,
    Function,
    Initialize,
}

impl ExtensionCategory {
    /// Categories applied at boot before the engine is handed out.
    pub const REGISTERED: [ExtensionCategory; 3] = [
        ExtensionCategory::Tag,
        ExtensionCategory::Filter,
        ExtensionCategory::Function,
    ];

    pub fn tag_name(self) -> &'static str {
        match self {
            ExtensionCategory::Tag => "twig.tag",
            ExtensionCategory::Filter => "twig.filter",
            ExtensionCategory::Function => "twig.function",
            ExtensionCategory::Initialize => "twig.initialize",
        }
    }
}

fn dispatch(
    extension: &dyn TwigExtension,
    tag: &TagDescriptor,
    container: &Container,
    tera: &mut Tera,
) -> Result<()> {
    if let Some(method) = tag.method() {
        if let Some(result) = extension.call(method, container, tera) {
            return result;
        }
    }
    extension.register(container, tera)
}

fn sorted_tags(container: &Container, category: ExtensionCategory) -> Vec<TagDescriptor> {
    let mut tags = container.get_tags_by_name(category.tag_name());
    sort_by_priority(&mut tags);
    tags
}

/// Apply every service tagged with `category` to `tera`, highest priority first.
///
/// Returns how many services were applied.
pub fn register_extensions(
    container: &Container,
    category: ExtensionCategory,
    tera: &mut Tera,
) -> Result<usize> {
    let mut applied = 0;
    for tag in sorted_tags(container, category) {
        let Some(extension) = container.extension(&tag.service_id) else {
            debug!(service = %tag.service_id, tag = %tag.name, "tagged service not registered, skipping");
            continue;
        };
        dispatch(extension.as_ref(), &tag, container, tera)?;
        applied += 1;
    }
    Ok(applied)
}

/// What happened to the `twig.initialize` hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitializeOutcome {
    pub completed: usize,
    /// The service whose hook failed and stopped the sequence.
    pub failed: Option<String>,
}

/// Run the `twig.initialize` hooks one after another, in priority order.
///
/// Only providers answering to the tag's `method` take part; `register` is
/// never called here. A failing hook stops the remaining ones. The failure is
/// logged, not returned: initialization problems never stop the application
/// from booting.
pub fn run_initializers(container: &Container, tera: &mut Tera) -> InitializeOutcome {
    let mut outcome = InitializeOutcome::default();

    for tag in sorted_tags(container, ExtensionCategory::Initialize) {
        let Some(extension) = container.extension(&tag.service_id) else {
            continue;
        };
        let Some(method) = tag.method() else {
            debug!(service = %tag.service_id, "twig.initialize tag without a method, skipping");
            continue;
        };
        let Some(result) = extension.call(method, container, tera) else {
            debug!(service = %tag.service_id, method, "no such twig.initialize hook, skipping");
            continue;
        };
        if let Err(e) = result {
            error!(service = %tag.service_id, error = %error_chain(&e), "twig.initialize hook failed");
            outcome.failed = Some(tag.service_id);
            break;
        }
        outcome.completed += 1;
    }

    outcome
}
