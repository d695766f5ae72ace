use std::path::Path;

use console::style;
use miette::Result;
use serde_json::{Map, Value};

use conga_tera::collector::DataCollector;
use conga_tera::config::load_config;
use conga_tera::error::ViewError;

const CLI_PROFILER_ID: &str = "cli";

pub fn run(template: String, config: String, data: Vec<String>, profile: bool) -> Result<()> {
    let mut loaded = load_config(Path::new(&config))?;
    if profile && !loaded.config.twig.profiler_enabled() {
        loaded.config.twig.profiler = Some(conga_tera::config::ProfilerSetting::Flag(true));
    }

    let data = parse_data(data)?;
    let (_, engine) = conga_tera::boot_from_config(&loaded)?;

    let rendered = engine.render(&template, &data, Some(CLI_PROFILER_ID));

    if profile {
        if let Some(collector) = engine.collector() {
            let collected = collector
                .collect_data(CLI_PROFILER_ID)
                .map_err(|e| miette::miette!("serializing profile: {e}"))?;
            if let Some(collected) = collected {
                let json = serde_json::to_string_pretty(&collected)
                    .map_err(|e| miette::miette!("serializing profile: {e}"))?;
                eprintln!("{}", style("Template profile:").bold());
                eprintln!("{json}");
            }
        }
    }

    println!("{}", rendered?);
    Ok(())
}

/// Turn `key=value` pairs into a JSON object. Values that parse as JSON keep
/// their type; anything else is a string.
fn parse_data(pairs: Vec<String>) -> std::result::Result<Value, ViewError> {
    let mut data = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(ViewError::InvalidData { input: pair });
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        data.insert(key.to_string(), value);
    }
    Ok(Value::Object(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_data_keeps_json_types() {
        let data = parse_data(vec![
            "name=world".into(),
            "count=3".into(),
            "flags=[true,false]".into(),
            "eq=a=b".into(),
        ])
        .unwrap();
        assert_eq!(data["name"], "world");
        assert_eq!(data["count"], 3);
        assert_eq!(data["flags"], serde_json::json!([true, false]));
        assert_eq!(data["eq"], "a=b");
    }

    #[test]
    fn parse_data_rejects_missing_equals() {
        let err = parse_data(vec!["oops".into()]).unwrap_err();
        assert!(matches!(err, ViewError::InvalidData { input } if input == "oops"));
    }
}
