pub mod schema;

use std::path::{Path, PathBuf};

use crate::error::{Result, ViewError};

pub use schema::{AppConfig, CaptureKind, ProfilerSetting, TwigConfig};

pub const CONFIG_FILE: &str = "conga.toml";

/// A loaded config together with the directory it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub root: PathBuf,
}

/// Load and validate an AppConfig from a conga.toml file or a directory holding one.
pub fn load_config(path: &Path) -> Result<LoadedConfig> {
    let config_path = if path.is_dir() {
        path.join(CONFIG_FILE)
    } else {
        path.to_path_buf()
    };

    if !config_path.exists() {
        return Err(ViewError::ConfigNotFound { path: config_path });
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| ViewError::Io {
        context: format!("reading {}", config_path.display()),
        source: e,
    })?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ViewError::ConfigParse { source: e })?;

    config.twig.validate()?;

    let root = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    for dir in config.bundles.values_mut() {
        if dir.is_relative() {
            *dir = root.join(&*dir);
        }
    }

    Ok(LoadedConfig { config, root })
}
