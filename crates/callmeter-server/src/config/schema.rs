use std::net::SocketAddr;

use serde::Deserialize;
use callmeter_core::error::{MetricsError, Result};
use callmeter_core::instrument::DEFAULT_DURATION_BUCKETS;
use callmeter_core::Registry;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub metrics: MetricsSection,

    #[serde(default)]
    pub http: HttpSection,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(MetricsError::UnsupportedVersion);
        }

        self.server.validate()?;
        check_ascending("metrics.duration_buckets", &self.metrics.duration_buckets)?;
        check_ascending("http.duration_buckets_ms", &self.http.duration_buckets_ms)?;

        Ok(())
    }
}

fn check_ascending(field: &str, bounds: &[f64]) -> Result<()> {
    if bounds.is_empty() {
        return Err(MetricsError::InvalidConfig(format!("{field} must not be empty")));
    }
    if bounds.iter().any(|b| !b.is_finite()) {
        return Err(MetricsError::InvalidConfig(format!("{field} must be finite")));
    }
    if bounds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(MetricsError::InvalidConfig(format!(
            "{field} must be strictly ascending"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            MetricsError::InvalidConfig(format!(
                "server.listen {:?} is not a socket address: {e}",
                self.listen
            ))
        })
    }
}

fn default_listen() -> String {
    "0.0.0.0:8000".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryChoice {
    #[default]
    Global,
    Isolated,
}

impl RegistryChoice {
    pub fn build(self) -> Registry {
        Registry::create(self == RegistryChoice::Isolated)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    #[serde(default)]
    pub registry: RegistryChoice,

    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            registry: RegistryChoice::default(),
            duration_buckets: default_duration_buckets(),
        }
    }
}

fn default_duration_buckets() -> Vec<f64> {
    DEFAULT_DURATION_BUCKETS.to_vec()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_http_buckets_ms")]
    pub duration_buckets_ms: Vec<f64>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_buckets_ms: default_http_buckets_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_http_buckets_ms() -> Vec<f64> {
    vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
}
