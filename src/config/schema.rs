use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tera::Value;

use crate::error::{Result, ViewError};

/// Root config structure deserialized from conga.toml.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    /// Bundle name to bundle directory. Relative paths are anchored at the
    /// directory holding the config file.
    #[serde(default)]
    pub bundles: BTreeMap<String, PathBuf>,

    #[serde(default)]
    pub twig: TwigConfig,
}

/// The `[twig]` namespace.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwigConfig {
    /// Escape output of every template (default: true).
    #[serde(default = "default_autoescape")]
    pub autoescape: bool,

    /// Engine options, passed through as globals available to every template.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,

    #[serde(default)]
    pub profiler: Option<ProfilerSetting>,
}

fn default_autoescape() -> bool {
    true
}

impl Default for TwigConfig {
    fn default() -> Self {
        Self {
            autoescape: default_autoescape(),
            options: BTreeMap::new(),
            profiler: None,
        }
    }
}

/// `profiler = true` or a `[twig.profiler]` table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ProfilerSetting {
    Flag(bool),
    Detailed(ProfilerOptions),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProfilerOptions {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub capture: Option<CaptureSetting>,

    /// Seconds an uncollected record is kept before it is swept. 0 keeps
    /// records until they are collected.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

/// `capture = true` or `capture = { source = true, context = false }`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CaptureSetting {
    Flag(bool),
    PerKind(CaptureKinds),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CaptureKinds {
    pub source: Option<bool>,
    pub parameters: Option<bool>,
    pub context: Option<bool>,
}

/// The kinds of data the collector can attach to a collected record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Source,
    Parameters,
    Context,
}

impl ProfilerSetting {
    pub fn is_enabled(&self) -> bool {
        match self {
            ProfilerSetting::Flag(enabled) => *enabled,
            ProfilerSetting::Detailed(options) => options.enabled,
        }
    }

    /// Whether a kind of data should be captured.
    ///
    /// A bare `profiler = true` enables timings only. In a per-kind map,
    /// kinds that are not listed are captured.
    pub fn is_capture(&self, kind: CaptureKind) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let ProfilerSetting::Detailed(options) = self else {
            return false;
        };
        match &options.capture {
            None | Some(CaptureSetting::Flag(false)) => false,
            Some(CaptureSetting::Flag(true)) => true,
            Some(CaptureSetting::PerKind(kinds)) => {
                let flag = match kind {
                    CaptureKind::Source => kinds.source,
                    CaptureKind::Parameters => kinds.parameters,
                    CaptureKind::Context => kinds.context,
                };
                flag.unwrap_or(true)
            }
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        match self {
            ProfilerSetting::Flag(_) => default_ttl_secs(),
            ProfilerSetting::Detailed(options) => options.ttl_secs,
        }
    }
}

impl TwigConfig {
    pub fn profiler_enabled(&self) -> bool {
        self.profiler.as_ref().is_some_and(ProfilerSetting::is_enabled)
    }

    /// Validate the config for internal consistency.
    pub fn validate(&self) -> Result<()> {
        for name in self.options.keys() {
            let mut chars = name.chars();
            let valid_start = chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
            if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ViewError::ConfigInvalidOption {
                    name: name.clone(),
                    reason: "option names are exposed as template globals and must be identifiers"
                        .into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn twig(toml_str: &str) -> TwigConfig {
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        config.twig
    }

    #[test]
    fn defaults_when_section_missing() {
        let config = twig("");
        assert!(config.autoescape);
        assert!(config.options.is_empty());
        assert!(!config.profiler_enabled());
    }

    #[test]
    fn profiler_flag_enables_timings_only() {
        let config = twig("[twig]\nprofiler = true\n");
        let profiler = config.profiler.unwrap();
        assert!(profiler.is_enabled());
        assert!(!profiler.is_capture(CaptureKind::Source));
        assert!(!profiler.is_capture(CaptureKind::Context));
        assert_eq!(profiler.ttl_secs(), 300);
    }

    #[test]
    fn profiler_table_disabled_captures_nothing() {
        let config = twig("[twig.profiler]\nenabled = false\ncapture = true\n");
        let profiler = config.profiler.unwrap();
        assert!(!profiler.is_enabled());
        assert!(!profiler.is_capture(CaptureKind::Parameters));
    }

    #[test]
    fn capture_true_captures_every_kind() {
        let config = twig("[twig.profiler]\nenabled = true\ncapture = true\n");
        let profiler = config.profiler.unwrap();
        assert!(profiler.is_capture(CaptureKind::Source));
        assert!(profiler.is_capture(CaptureKind::Parameters));
        assert!(profiler.is_capture(CaptureKind::Context));
    }

    #[test]
    fn capture_map_defaults_unlisted_kinds_to_on() {
        let config = twig(
            "[twig.profiler]\nenabled = true\nttl_secs = 10\n\n[twig.profiler.capture]\nsource = false\n",
        );
        let profiler = config.profiler.unwrap();
        assert!(!profiler.is_capture(CaptureKind::Source));
        assert!(profiler.is_capture(CaptureKind::Parameters));
        assert!(profiler.is_capture(CaptureKind::Context));
        assert_eq!(profiler.ttl_secs(), 10);
    }

    #[test]
    fn options_become_globals() {
        let config = twig("[twig.options]\nsite_name = \"Demo\"\nyear = 2024\n");
        assert_eq!(config.options["site_name"], Value::String("Demo".into()));
        assert_eq!(config.options["year"], serde_json::json!(2024));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_identifier_option() {
        let config = twig("[twig.options]\n\"site-name\" = \"Demo\"\n");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ViewError::ConfigInvalidOption { name, .. } if name == "site-name"));
    }
}
