use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "conga-tera",
    about = "Render and check namespaced Tera views for conga bundles",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a template and print the result
    Render {
        /// Template location, e.g. demo-bundle:default/index
        template: String,

        /// Path to conga.toml or the directory holding it
        #[arg(short, long, default_value = ".")]
        config: String,

        /// Set template data (can be repeated: -d key=value, values may be JSON)
        #[arg(short, long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,

        /// Print the collected template profile to stderr
        #[arg(long)]
        profile: bool,
    },

    /// Show where a template location resolves to
    Resolve {
        /// Template location, e.g. demo-bundle:default/index
        location: String,

        /// Path to conga.toml or the directory holding it
        #[arg(short, long, default_value = ".")]
        config: String,
    },

    /// Load every bundle template and report syntax errors
    Check {
        /// Path to conga.toml or the directory holding it
        #[arg(short, long, default_value = ".")]
        config: String,
    },
}
