#![allow(unused_assignments)]

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ViewError {
    #[error("Config not found at {path}")]
    #[diagnostic(help("Pass --config or run from a directory containing conga.toml"))]
    ConfigNotFound { path: PathBuf },

    #[error("Failed to parse conga.toml")]
    #[diagnostic(help("Check the TOML syntax in your conga.toml file"))]
    ConfigParse {
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid twig option '{name}': {reason}")]
    ConfigInvalidOption { name: String, reason: String },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Template '{location}' not found at {path}")]
    #[diagnostic(help(
        "Namespaced templates resolve to <bundle>/lib/resources/views/<path>.html.twig"
    ))]
    TemplateNotFound {
        location: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse template '{template}'")]
    #[diagnostic(help("Check your Tera template syntax"))]
    TemplateParse {
        template: String,
        #[source]
        source: tera::Error,
    },

    #[error("Failed to render template '{template}'")]
    RenderError {
        template: String,
        #[source]
        source: tera::Error,
    },

    #[error("Render data must be a JSON object")]
    InvalidContext {
        #[source]
        source: tera::Error,
    },

    #[error("Invalid data value '{input}': expected KEY=VALUE")]
    InvalidData { input: String },

    #[error("Extension '{service}' failed: {message}")]
    Extension { service: String, message: String },

    #[error("Service '{id}' is not registered")]
    #[diagnostic(help("Register the service on the container before booting"))]
    MissingService { id: String },
}

pub type Result<T> = std::result::Result<T, ViewError>;

/// Flatten an error and its sources into one line.
///
/// Tera keeps the useful part of a parse error in the source chain, so the
/// collector and the CLI use this instead of `Display` alone.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        message.push_str(": ");
        message.push_str(&source.to_string());
        current = source.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_includes_sources() {
        let err = ViewError::Io {
            context: "reading layout".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            error_chain(&err),
            "IO error: reading layout: no such file"
        );
    }
}
