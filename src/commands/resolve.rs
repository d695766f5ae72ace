use std::path::Path;

use console::style;
use miette::Result;

use conga_tera::config::load_config;
use conga_tera::namespace::{normalize_namespace, BundleResolver, NamespaceResolver, VIEWS_SUBDIR};

pub fn run(location: String, config: String) -> Result<()> {
    let loaded = load_config(Path::new(&config))?;

    let Some(namespace) = normalize_namespace(&location) else {
        println!(
            "{} not a namespace path, read relative to {}",
            style(&location).cyan(),
            style(loaded.root.display()).cyan()
        );
        return Ok(());
    };

    let resolver = BundleResolver::new(loaded.config.bundles);
    println!("  {} {}", style("namespace:").dim(), namespace);

    match resolver.resolve_with_subpath(&namespace, VIEWS_SUBDIR) {
        Some(path) => {
            let marker = if path.is_file() {
                style("✓").green()
            } else {
                style("✗ missing").red()
            };
            println!("  {}      {} {}", style("path:").dim(), path.display(), marker);
        }
        None => {
            println!(
                "  {}      {}",
                style("path:").dim(),
                style("unresolved (unknown bundle)").red()
            );
            std::process::exit(1);
        }
    }

    Ok(())
}
