//! Config command handler

use crate::commands::{ConfigArgs, ConfigFormat};
use crate::error::CliResult;
use crate::output::Output;
use std::path::Path;
use vigia::HarnessConfig;

/// Load from `file`, or from defaults; `VIGIA_*` variables apply either way
pub fn load_harness_config(file: Option<&Path>) -> CliResult<HarnessConfig> {
    let config = match file {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::from_env()?,
    };
    Ok(config)
}

/// Render `config` in `format`
pub fn render_config(config: &HarnessConfig, format: ConfigFormat) -> CliResult<String> {
    Ok(match format {
        ConfigFormat::Yaml => config.to_yaml()?,
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
    })
}

/// Execute the config command
pub fn execute_config(out: &Output, args: &ConfigArgs) -> CliResult<()> {
    let config = load_harness_config(args.file.as_deref())?;
    out.data(&render_config(&config, args.format)?);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_render_yaml_round_trips() {
        let config = HarnessConfig::default();
        let yaml = render_config(&config, ConfigFormat::Yaml).unwrap();
        assert_eq!(HarnessConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_render_json_has_wait_policy() {
        let json = render_config(&HarnessConfig::default(), ConfigFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["wait"]["timeout_ms"], 5000);
        assert_eq!(value["wait"]["interval_ms"], 50);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url: http://forum.test\nwait:\n  timeout_ms: 900").unwrap();
        let config = load_harness_config(Some(file.path())).unwrap();
        assert_eq!(config.base_url, "http://forum.test");
        assert_eq!(config.wait.timeout_ms, 900);
        assert_eq!(config.wait.interval_ms, 50);
    }

    #[test]
    fn test_load_rejects_bad_base_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url: not a url").unwrap();
        let err = load_harness_config(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_harness_config(Some(Path::new("/nonexistent/vigia.yaml"))).is_err());
    }
}
