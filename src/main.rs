mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conga_tera=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Render {
            template,
            config,
            data,
            profile,
        } => commands::render::run(template, config, data, profile),
        Commands::Resolve { location, config } => commands::resolve::run(location, config),
        Commands::Check { config } => commands::check::run(config),
    }
}
