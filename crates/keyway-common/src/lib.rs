use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub type ConfigError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub routing: RoutingConfig,
    #[serde(default)]
    pub inspection: InspectionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn from_yaml_str(data: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("reading {}: {}", path.as_ref().display(), e))?;
        Self::from_yaml_str(&data)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.listen_address.trim().is_empty() {
            return Err("proxy.listen_address must not be empty".into());
        }
        if self.routing.default_upstream.trim().is_empty() {
            return Err("routing.default_upstream must not be empty".into());
        }
        if let Some((key, _)) = self
            .routing
            .tenants
            .iter()
            .find(|(_, addr)| addr.trim().is_empty())
        {
            return Err(format!("routing.tenants.{} has an empty upstream", key).into());
        }
        if self.inspection.max_preread_bytes == 0 {
            return Err("inspection.max_preread_bytes must be greater than zero".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    pub listen_address: String,
}

/// Where connections go once their tenant is known.
///
/// `tenants` is keyed by the full routing key (client id prefix plus
/// `suffix`), so a client id of `acme|sensor-7` looks up `acme_Broker`.
#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    pub default_upstream: String,
    #[serde(default)]
    pub tenants: HashMap<String, String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InspectionConfig {
    /// When false every connection goes to the default upstream untouched.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How long to wait for the first CONNECT before giving up and routing
    /// to the default upstream.
    #[serde(default = "default_preread_timeout_ms")]
    pub preread_timeout_ms: u64,
    /// Upper bound on bytes buffered while waiting for the client id.
    #[serde(default = "default_max_preread_bytes")]
    pub max_preread_bytes: usize,
    /// Reject client ids that run past the declared Remaining Length.
    #[serde(default)]
    pub enforce_remaining_length: bool,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preread_timeout_ms: default_preread_timeout_ms(),
            max_preread_bytes: default_max_preread_bytes(),
            enforce_remaining_length: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

fn default_delimiter() -> char {
    '|'
}

fn default_suffix() -> String {
    "_Broker".to_string()
}

fn default_true() -> bool {
    true
}

fn default_preread_timeout_ms() -> u64 {
    5_000
}

fn default_max_preread_bytes() -> usize {
    16 * 1024
}
