//! Server config loader (strict parsing).

pub mod schema;

use std::fs;

use callmeter_core::error::{MetricsError, Result};

pub use schema::{HttpSection, MetricsSection, RegistryChoice, ServerConfig, ServerSection};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CALLMETER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "callmeter.yaml";

pub fn load_from_file(path: &str) -> Result<ServerConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| MetricsError::InvalidConfig(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ServerConfig> {
    let cfg: ServerConfig = serde_yaml::from_str(s)
        .map_err(|e| MetricsError::InvalidConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Path from `CALLMETER_CONFIG`, else `callmeter.yaml`.
pub fn config_path() -> String {
    std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}
