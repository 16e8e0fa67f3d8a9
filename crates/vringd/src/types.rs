//! Discovery record types for the virtual ring

use std::fmt;
use std::str::FromStr;

use treadmill_agent_common::{AgentError, AgentResult};

/// Transport protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Protocol name as understood by iptables `-p`
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// Parsed endpoint key
///
/// Format: `<proid>.<app>#<instance>:<protocol>:<endpoint-name>`. The
/// owner part is opaque; two keys are the same endpoint only if the full
/// string matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    raw: String,
    protocol: Protocol,
    endpoint: String,
}

impl EndpointKey {
    pub fn parse(raw: &str) -> AgentResult<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            return Err(AgentError::malformed_event(
                raw,
                "expected <owner>:<protocol>:<endpoint>",
            ));
        }

        let (owner, proto, endpoint) = (parts[0], parts[1], parts[2]);
        if owner.is_empty() || endpoint.is_empty() {
            return Err(AgentError::malformed_event(
                raw,
                "empty owner or endpoint name",
            ));
        }

        let protocol = proto
            .parse::<Protocol>()
            .map_err(|e| AgentError::malformed_event(raw, e))?;

        Ok(Self {
            raw: raw.to_string(),
            protocol,
            endpoint: endpoint.to_string(),
        })
    }

    /// The full key string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Endpoint name, e.g. `tcp_ep`
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Value half of a discovery record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointValue {
    /// Endpoint is reachable at `hostname:port`
    Present { hostname: String, port: u16 },
    /// Endpoint has gone away
    Tombstone,
}

impl EndpointValue {
    /// Parses `hostname:port`; `None` is a tombstone
    pub fn parse(key: &str, value: Option<&str>) -> AgentResult<Self> {
        let Some(hostport) = value else {
            return Ok(EndpointValue::Tombstone);
        };

        let (hostname, port) = hostport
            .rsplit_once(':')
            .ok_or_else(|| AgentError::malformed_event(key, format!("bad value '{}'", hostport)))?;

        if hostname.is_empty() {
            return Err(AgentError::malformed_event(key, "empty hostname"));
        }

        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| AgentError::malformed_event(key, format!("bad port '{}'", port)))?;

        Ok(EndpointValue::Present {
            hostname: hostname.to_string(),
            port,
        })
    }
}

/// Raw `(key, value)` pair as delivered by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub key: String,
    /// `None` marks a removal
    pub value: Option<String>,
}

impl DiscoveryEvent {
    pub fn present(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_key() {
        let key = EndpointKey::parse("proid.foo#123:tcp:tcp_ep").unwrap();
        assert_eq!(key.protocol(), Protocol::Tcp);
        assert_eq!(key.endpoint(), "tcp_ep");
        assert_eq!(key.as_str(), "proid.foo#123:tcp:tcp_ep");
    }

    #[test]
    fn test_parse_endpoint_key_udp() {
        let key = EndpointKey::parse("proid.foo#123:udp:udp_ep").unwrap();
        assert_eq!(key.protocol(), Protocol::Udp);
    }

    #[test]
    fn test_parse_endpoint_key_malformed() {
        assert!(EndpointKey::parse("proid.foo#123").is_err());
        assert!(EndpointKey::parse("proid.foo#123:tcp").is_err());
        assert!(EndpointKey::parse("proid.foo#123:sctp:ep").is_err());
        assert!(EndpointKey::parse("proid.foo#123:tcp:").is_err());
        assert!(EndpointKey::parse("a:tcp:b:c").is_err());
    }

    #[test]
    fn test_keys_differ_by_owner() {
        let a = EndpointKey::parse("proid.foo#123:tcp:tcp_ep").unwrap();
        let b = EndpointKey::parse("proid.bla#123:tcp:tcp_ep").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.endpoint(), b.endpoint());
    }

    #[test]
    fn test_parse_value_present() {
        let value = EndpointValue::parse("k", Some("xxx.xx.com:12345")).unwrap();
        assert_eq!(
            value,
            EndpointValue::Present {
                hostname: "xxx.xx.com".to_string(),
                port: 12345
            }
        );
    }

    #[test]
    fn test_parse_value_tombstone() {
        let value = EndpointValue::parse("k", None).unwrap();
        assert_eq!(value, EndpointValue::Tombstone);
    }

    #[test]
    fn test_parse_value_malformed() {
        assert!(EndpointValue::parse("k", Some("xxx.xx.com")).is_err());
        assert!(EndpointValue::parse("k", Some("xxx.xx.com:abc")).is_err());
        assert!(EndpointValue::parse("k", Some("xxx.xx.com:0")).is_err());
        assert!(EndpointValue::parse("k", Some("xxx.xx.com:70000")).is_err());
        assert!(EndpointValue::parse("k", Some(":80")).is_err());
    }

    #[test]
    fn test_protocol_round_trip() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }
}
