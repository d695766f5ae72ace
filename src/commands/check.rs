use std::path::Path;

use console::style;
use miette::Result;

use conga_tera::check::check_bundles;
use conga_tera::config::load_config;

pub fn run(config: String) -> Result<()> {
    let loaded = load_config(Path::new(&config))?;

    println!(
        "{} {}",
        style("Checking bundles from").bold(),
        style(loaded.root.display()).cyan()
    );

    let result = check_bundles(&loaded)?;

    println!("  Bundles: {}", result.bundle_count);
    println!("  Templates: {}", result.template_count);

    if !result.warnings.is_empty() {
        println!("\n{}", style("Warnings:").yellow().bold());
        for w in &result.warnings {
            println!("  {} {}", style("⚠").yellow(), w);
        }
    }

    if !result.errors.is_empty() {
        println!("\n{}", style("Errors:").red().bold());
        for e in &result.errors {
            println!("  {} {}", style("✗").red(), e);
        }
        println!(
            "\n{} {} template(s) failed to load",
            style("✗").red().bold(),
            result.errors.len()
        );
        std::process::exit(1);
    } else {
        println!("\n{} All templates load", style("✓").green().bold());
    }

    Ok(())
}
