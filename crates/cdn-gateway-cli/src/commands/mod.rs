pub mod grant;
pub mod ingest;
pub mod objects;
pub mod resolve;

use anyhow::Result;
use cdn_gateway_core::GatewayConfig;
use serde::Serialize;
use tracing::info;

/// Command output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "yaml" => Self::Yaml,
            _ => Self::Text,
        }
    }
}

/// Print a structured value; `Text` falls back to pretty JSON.
pub fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Json | OutputFormat::Text => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
    }
    Ok(())
}

pub fn load_config(config_path: &str) -> Result<GatewayConfig> {
    info!("Loading configuration from: {}", config_path);
    Ok(GatewayConfig::from_file(config_path)?)
}
