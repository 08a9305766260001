//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "toolchain-member-operator";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Namespace the buffer deployment is reconciled in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Reconciliation interval in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Deadline for a single cluster call in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_namespace() -> String {
    std::env::var("POD_NAMESPACE")
        .ok()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

impl AgentConfig {
    /// Load configuration from `BUFFER_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("BUFFER"))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid BUFFER_* configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("Namespace must not be empty");
        }
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("Reconcile interval must be at least one second");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be at least one second");
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<String, String>>();
        config::Environment::with_prefix("BUFFER").source(Some(source))
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_env(env(&[])).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.reconcile_interval(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(!config.namespace.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::from_env(env(&[
            ("BUFFER_NAMESPACE", "member-ns"),
            ("BUFFER_API_PORT", "9100"),
            ("BUFFER_RECONCILE_INTERVAL_SECS", "15"),
            ("BUFFER_REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.namespace, "member-ns");
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.reconcile_interval_secs, 15);
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(AgentConfig::from_env(env(&[("BUFFER_API_PORT", "not-a-port")])).is_err());
        assert!(AgentConfig::from_env(env(&[("BUFFER_RECONCILE_INTERVAL_SECS", "0")])).is_err());
    }
}
