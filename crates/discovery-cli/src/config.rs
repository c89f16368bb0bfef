use anyhow::{Context, Result};
use clap::ValueEnum;
use discovery_core::{ConnectionOptions, Endpoint};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: Option<Endpoint>,
    pub options: ConnectionOptions,
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One identifier per line
    #[default]
    Plain,
    /// Identifier with record, byte and field counts
    Long,
    /// JSON array, printed once the listing completes
    Json,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_core::RetryPolicy;
    use std::io::Write;

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "endpoint": "grpc+tcp://[::1]:31010",
                "options": {{
                    "timeout_ms": 250,
                    "retry_policy": {{ "kind": "fixed", "delay_ms": 100, "max_retries": 3 }}
                }},
                "output": "json"
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.endpoint, Some(Endpoint::new("::1", 31010)));
        assert_eq!(config.options.timeout_ms, 250);
        assert_eq!(
            config.options.retry_policy,
            RetryPolicy::Fixed {
                delay_ms: 100,
                max_retries: 3
            }
        );
        assert_eq!(config.output, OutputFormat::Json);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.endpoint.is_none());
        assert_eq!(config.options, ConnectionOptions::default());
        assert_eq!(config.output, OutputFormat::Plain);
    }

    #[test]
    fn test_bad_endpoint_in_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "endpoint": "grpc+unix:///tmp/sock" }}"#).unwrap();
        assert!(Config::from_file(file.path()).is_err());
    }
}
