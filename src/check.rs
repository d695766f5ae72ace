use walkdir::WalkDir;

use crate::boot_from_config;
use crate::config::LoadedConfig;
use crate::error::{error_chain, Result};
use crate::namespace::{TEMPLATE_SUFFIX, VIEWS_SUBDIR};

/// Result of validating every bundle's templates.
pub struct CheckResult {
    pub bundle_count: usize,
    pub template_count: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Load every `*.html.twig` under each bundle's views directory.
pub fn check_bundles(loaded: &LoadedConfig) -> Result<CheckResult> {
    let mut loaded = loaded.clone();
    loaded.config.twig.profiler = None;
    let (_, engine) = boot_from_config(&loaded)?;

    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let mut template_count = 0;

    if loaded.config.bundles.is_empty() {
        warnings.push("No bundles configured in [bundles]".to_string());
    }

    for (bundle, dir) in &loaded.config.bundles {
        let views = dir.join(VIEWS_SUBDIR);
        if !views.is_dir() {
            warnings.push(format!(
                "Bundle '{bundle}' has no {VIEWS_SUBDIR} directory ({})",
                views.display()
            ));
            continue;
        }

        for entry in WalkDir::new(&views)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Ok(rel_path) = entry.path().strip_prefix(&views) else {
                continue;
            };
            let rel = rel_path
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !rel.ends_with(TEMPLATE_SUFFIX) {
                continue;
            }

            template_count += 1;
            let namespace = format!("{bundle}:{rel}");
            if let Err(e) = engine.load(&namespace) {
                errors.push(format!("{namespace}: {}", error_chain(&e)));
            }
        }
    }

    Ok(CheckResult {
        bundle_count: loaded.config.bundles.len(),
        template_count,
        warnings,
        errors,
    })
}
