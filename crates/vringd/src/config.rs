//! Configuration for vringd
//!
//! [`VRingConfig`] is what a single reconciler run needs. [`VRingDaemonConfig`]
//! is the on-disk TOML file the daemon loads it from, together with the
//! discovery, resolver and iptables settings.
//! Default location: /etc/treadmill/vringd.toml

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use treadmill_agent_common::{shell, AgentError, AgentResult};

use crate::resolver::RetryPolicy;

/// iptables refuses chain names longer than this
pub const MAX_CHAIN_NAME_LEN: usize = 28;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/treadmill/vringd.toml";

/// Immutable per-run ring configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VRingConfig {
    /// Firewall chain owned by this ring
    pub chain: String,
    /// Endpoint name -> virtual port
    pub port_map: HashMap<String, u16>,
    /// Endpoint names eligible for translation
    pub endpoints: HashSet<String>,
    /// Hostnames never translated
    pub skip: HashSet<String>,
}

impl VRingConfig {
    pub fn new<P, E>(chain: impl Into<String>, port_map: P, endpoints: E) -> Self
    where
        P: IntoIterator<Item = (String, u16)>,
        E: IntoIterator<Item = String>,
    {
        Self {
            chain: chain.into(),
            port_map: port_map.into_iter().collect(),
            endpoints: endpoints.into_iter().collect(),
            skip: HashSet::new(),
        }
    }

    pub fn with_skip<S>(mut self, skip: S) -> Self
    where
        S: IntoIterator<Item = String>,
    {
        self.skip = skip.into_iter().collect();
        self
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.chain.is_empty() {
            return Err(AgentError::invalid_config("chain", "must not be empty"));
        }

        if self.chain.len() > MAX_CHAIN_NAME_LEN {
            return Err(AgentError::invalid_config(
                "chain",
                format!("'{}' is longer than {} characters", self.chain, MAX_CHAIN_NAME_LEN),
            ));
        }

        if let Some((name, _)) = self.port_map.iter().find(|(_, port)| **port == 0) {
            return Err(AgentError::invalid_config(
                "port_map",
                format!("virtual port for '{}' must be > 0", name),
            ));
        }

        Ok(())
    }
}

/// Where discovery events come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// `host:port` of the discovery service, or `-` for stdin
    #[serde(default = "default_discovery_address")]
    pub address: String,

    /// Watch pattern sent on connect, e.g. `proid.app*`
    #[serde(default)]
    pub pattern: String,
}

/// Hostname resolution retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Extra lookups after a failure before the event is dropped
    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IptablesConfig {
    #[serde(default = "default_iptables_command")]
    pub command: String,

    /// Pass `-w` so commands wait for the xtables lock
    #[serde(default = "default_iptables_wait")]
    pub wait: bool,
}

/// Complete vringd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VRingDaemonConfig {
    #[serde(default)]
    pub chain: String,

    /// BTreeMap keeps the serialized file stable
    #[serde(default)]
    pub port_map: BTreeMap<String, u16>,

    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub skip: Vec<String>,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub iptables: IptablesConfig,
}

fn default_discovery_address() -> String {
    "-".to_string()
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_iptables_command() -> String {
    shell::IPTABLES_CMD.to_string()
}

fn default_iptables_wait() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            address: default_discovery_address(),
            pattern: String::new(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for IptablesConfig {
    fn default() -> Self {
        Self {
            command: default_iptables_command(),
            wait: default_iptables_wait(),
        }
    }
}

impl VRingDaemonConfig {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load_or_default(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                AgentError::invalid_config(
                    path.display().to_string(),
                    format!("failed to parse: {}", e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(AgentError::invalid_config(
                path.display().to_string(),
                e.to_string(),
            )),
        }
    }

    /// The reconciler's view of this configuration
    pub fn vring(&self) -> VRingConfig {
        VRingConfig::new(
            self.chain.clone(),
            self.port_map.iter().map(|(k, v)| (k.clone(), *v)),
            self.endpoints.iter().cloned(),
        )
        .with_skip(self.skip.iter().cloned())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.resolver.retries,
            delay: Duration::from_millis(self.resolver.retry_delay_ms),
        }
    }

    pub fn validate(&self) -> AgentResult<()> {
        self.vring().validate()?;

        if self.endpoints.is_empty() {
            return Err(AgentError::invalid_config(
                "endpoints",
                "at least one endpoint is required",
            ));
        }

        if let Some(missing) = self
            .endpoints
            .iter()
            .find(|ep| !self.port_map.contains_key(*ep))
        {
            tracing::warn!(
                endpoint = %missing,
                "Endpoint has no port_map entry, its events will be ignored"
            );
        }

        if self.iptables.command.is_empty() {
            return Err(AgentError::invalid_config(
                "iptables.command",
                "must not be empty",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> VRingDaemonConfig {
        toml::from_str(
            r#"
chain = "ring_0"
endpoints = ["tcp_ep", "udp_ep"]
skip = ["yyy.xx.com"]

[port_map]
tcp_ep = 10000
udp_ep = 11000
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = VRingDaemonConfig::default();
        assert_eq!(config.discovery.address, "-");
        assert_eq!(config.resolver.retries, 0);
        assert_eq!(config.iptables.command, "/sbin/iptables");
        assert!(config.iptables.wait);
    }

    #[test]
    fn test_toml_deserialization() {
        let config = sample();
        assert_eq!(config.chain, "ring_0");
        assert_eq!(config.port_map.get("tcp_ep"), Some(&10000));
        assert_eq!(config.skip, vec!["yyy.xx.com".to_string()]);
        // Unspecified sections use defaults
        assert_eq!(config.resolver.retry_delay_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vring_view() {
        let vring = sample().vring();
        assert_eq!(vring.chain, "ring_0");
        assert!(vring.endpoints.contains("udp_ep"));
        assert!(vring.skip.contains("yyy.xx.com"));
        assert_eq!(vring.port_map.get("udp_ep"), Some(&11000));
    }

    #[test]
    fn test_validate_empty_chain() {
        let mut config = sample();
        config.chain.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_long_chain() {
        let mut config = sample();
        config.chain = "x".repeat(MAX_CHAIN_NAME_LEN + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_port() {
        let mut config = sample();
        config.port_map.insert("tcp_ep".to_string(), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_no_endpoints() {
        let mut config = sample();
        config.endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy() {
        let mut config = sample();
        config.resolver.retries = 3;
        config.resolver.retry_delay_ms = 250;
        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                retries: 3,
                delay: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chain = \"ring_7\"\nendpoints = [\"http\"]").unwrap();
        writeln!(file, "[port_map]\nhttp = 8080").unwrap();

        let config = VRingDaemonConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.chain, "ring_7");
        assert_eq!(config.port_map.get("http"), Some(&8080));
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chain = [").unwrap();
        assert!(VRingDaemonConfig::load_or_default(file.path()).is_err());
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = VRingDaemonConfig::load_or_default("/nonexistent/vringd.toml").unwrap();
        assert!(config.chain.is_empty());
    }
}
