//! Endpoint resolution
//!
//! Turns a discovery `hostname:port` into the address the NAT rules are
//! written against. The skip list is matched against the hostname as
//! announced, before any lookup happens.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use treadmill_agent_common::{AgentError, AgentResult};

/// Hostname to IPv4 address lookup
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> AgentResult<Ipv4Addr>;
}

/// Resolver backed by the system's name service
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> AgentResult<Ipv4Addr> {
        if let Ok(ip) = hostname.parse::<Ipv4Addr>() {
            return Ok(ip);
        }

        let addrs = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| AgentError::resolve(hostname, e.to_string()))?;

        addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| AgentError::resolve(hostname, "no IPv4 address"))
    }
}

/// What to do when a lookup fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Extra attempts after a retryable failure; 0 drops the event at once
    pub retries: u32,
    pub delay: Duration,
}

/// Outcome of resolving one present endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Ipv4Addr),
    /// Host is on the skip list
    Skipped,
}

/// Applies the skip list and retry policy around a [`HostResolver`]
pub struct EndpointResolver<R> {
    resolver: R,
    skip: HashSet<String>,
    retry: RetryPolicy,
}

impl<R: HostResolver> EndpointResolver<R> {
    pub fn new(resolver: R, skip: HashSet<String>) -> Self {
        Self {
            resolver,
            skip,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_skipped(&self, hostname: &str) -> bool {
        self.skip.contains(hostname)
    }

    pub async fn resolve(&self, hostname: &str) -> AgentResult<Resolution> {
        if self.is_skipped(hostname) {
            debug!(host = %hostname, "Host is on the skip list");
            return Ok(Resolution::Skipped);
        }

        let mut attempt = 0;
        loop {
            match self.resolver.resolve(hostname).await {
                Ok(ip) => return Ok(Resolution::Resolved(ip)),
                Err(e) if e.is_retryable() && attempt < self.retry.retries => {
                    attempt += 1;
                    warn!(
                        host = %hostname,
                        attempt,
                        error = %e,
                        "Resolution failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
