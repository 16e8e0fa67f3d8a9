//! VRing Manager - virtual ring NAT reconciliation
//!
//! Consumes discovery events for the ring's peers and keeps one DNAT/SNAT
//! pair per announced endpoint in the ring's chain. Tombstones carry no
//! payload, so the manager remembers the route it installed for every key
//! and undoes exactly that on removal.

use std::collections::HashMap;

use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use treadmill_agent_common::{AgentError, AgentResult};

use crate::config::VRingConfig;
use crate::firewall::FirewallGateway;
use crate::resolver::{EndpointResolver, HostResolver, Resolution, RetryPolicy};
use crate::rules::{NatRulePair, VRingRoute};
use crate::types::{DiscoveryEvent, EndpointKey, EndpointValue};

/// Reconciler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VRingState {
    Uninitialized,
    ChainConfigured,
    Running,
    Terminated,
}

/// What processing one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// New rule pair installed
    Added,
    /// Previous pair for the key removed, new pair installed
    Updated,
    /// Recorded pair removed
    Removed,
    /// Endpoint name not in the allow-list
    Filtered,
    /// Host on the skip list
    Skipped,
    /// Tombstone for a key that was never applied
    Unknown,
    /// Endpoint has no virtual port
    Unmapped,
    /// Key or value could not be parsed
    Malformed,
    /// Hostname lookup failed
    Unresolved,
}

/// Why a run returned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    /// The feed returned its last event
    #[default]
    FeedEnded,
    /// The cancellation token fired
    Cancelled,
}

/// Counters reported when a run ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub stop: StopReason,
    pub events: u64,
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    /// Filtered, skipped, unknown and unmapped events
    pub ignored: u64,
    /// Malformed and unresolved events
    pub dropped: u64,
    /// Firewall calls that returned an error
    pub firewall_errors: u64,
}

impl RunStats {
    fn record(&mut self, outcome: EventOutcome) {
        self.events += 1;
        match outcome {
            EventOutcome::Added => self.added += 1,
            EventOutcome::Updated => self.updated += 1,
            EventOutcome::Removed => self.removed += 1,
            EventOutcome::Filtered
            | EventOutcome::Skipped
            | EventOutcome::Unknown
            | EventOutcome::Unmapped => self.ignored += 1,
            EventOutcome::Malformed | EventOutcome::Unresolved => self.dropped += 1,
        }
    }
}

/// VRing Manager
///
/// Sole writer of the ring's chain. Events must be fed in discovery order.
pub struct VRingMgr<G, R> {
    config: VRingConfig,
    gateway: G,
    resolver: EndpointResolver<R>,

    /// Route applied for every endpoint key, keyed by the full key string
    routes: HashMap<String, VRingRoute>,

    state: VRingState,
    stats: RunStats,
}

impl<G: FirewallGateway, R: HostResolver> VRingMgr<G, R> {
    /// Create a manager; the skip list comes from `config`
    pub fn new(config: VRingConfig, gateway: G, resolver: R) -> Self {
        let resolver = EndpointResolver::new(resolver, config.skip.clone());
        info!("VRingMgr initialized for chain {}", config.chain);

        Self {
            config,
            gateway,
            resolver,
            routes: HashMap::new(),
            state: VRingState::Uninitialized,
            stats: RunStats::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.resolver = self.resolver.with_retry(retry);
        self
    }

    pub fn chain(&self) -> &str {
        &self.config.chain
    }

    pub fn state(&self) -> VRingState {
        self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Number of endpoints with rules currently applied
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Prepare the ring's chain; must precede any rule change
    pub async fn configure(&mut self) -> AgentResult<()> {
        if self.state != VRingState::Uninitialized {
            return Err(AgentError::internal(format!(
                "chain {} configured twice (state {:?})",
                self.config.chain, self.state
            )));
        }

        self.gateway.configure_nat_rules(&self.config.chain).await?;
        self.state = VRingState::ChainConfigured;
        Ok(())
    }

    /// Apply a single discovery event
    pub async fn process_event(&mut self, event: &DiscoveryEvent) -> EventOutcome {
        let outcome = self.apply_event(event).await;
        self.stats.record(outcome);
        outcome
    }

    async fn apply_event(&mut self, event: &DiscoveryEvent) -> EventOutcome {
        let key = match EndpointKey::parse(&event.key) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed discovery key");
                return EventOutcome::Malformed;
            }
        };

        if !self.config.endpoints.contains(key.endpoint()) {
            debug!(key = %key, "Endpoint not in ring, ignoring");
            return EventOutcome::Filtered;
        }

        match EndpointValue::parse(key.as_str(), event.value.as_deref()) {
            Ok(EndpointValue::Tombstone) => self.do_route_del(&key).await,
            Ok(EndpointValue::Present { hostname, port }) => {
                self.do_route_add(&key, &hostname, port).await
            }
            Err(e) => {
                warn!(error = %e, "Ignoring malformed discovery value");
                EventOutcome::Malformed
            }
        }
    }

    async fn do_route_add(&mut self, key: &EndpointKey, hostname: &str, port: u16) -> EventOutcome {
        let Some(virtual_port) = self.config.port_map.get(key.endpoint()).copied() else {
            warn!(key = %key, "No virtual port for endpoint {}", key.endpoint());
            return EventOutcome::Unmapped;
        };

        let ip = match self.resolver.resolve(hostname).await {
            Ok(Resolution::Resolved(ip)) => ip,
            Ok(Resolution::Skipped) => {
                debug!(key = %key, host = %hostname, "Skipping host");
                return EventOutcome::Skipped;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping event");
                return EventOutcome::Unresolved;
            }
        };

        let route = VRingRoute {
            ip,
            real_port: port,
            protocol: key.protocol(),
            virtual_port,
        };

        // A key that is announced again replaces its old rules
        let outcome = match self.routes.get(key.as_str()).copied() {
            Some(old) => {
                info!(key = %key, route = %old, "Replacing vring route");
                self.delete_rules(&old.rules()).await;
                EventOutcome::Updated
            }
            None => EventOutcome::Added,
        };

        info!(key = %key, route = %route, "Adding vring route");
        self.add_rules(&route.rules()).await;
        self.routes.insert(key.as_str().to_string(), route);

        outcome
    }

    async fn do_route_del(&mut self, key: &EndpointKey) -> EventOutcome {
        let Some(route) = self.routes.remove(key.as_str()) else {
            debug!(key = %key, "No vring route to remove");
            return EventOutcome::Unknown;
        };

        info!(key = %key, route = %route, "Deleting vring route");
        self.delete_rules(&route.rules()).await;
        EventOutcome::Removed
    }

    async fn add_rules(&mut self, rules: &NatRulePair) {
        let chain = &self.config.chain;

        if let Err(e) = self.gateway.add_dnat_rule(&rules.dnat, chain).await {
            warn!(chain = %chain, rule = %rules.dnat, error = %e, "Failed to add rule");
            self.stats.firewall_errors += 1;
        }
        if let Err(e) = self.gateway.add_snat_rule(&rules.snat, chain).await {
            warn!(chain = %chain, rule = %rules.snat, error = %e, "Failed to add rule");
            self.stats.firewall_errors += 1;
        }
    }

    async fn delete_rules(&mut self, rules: &NatRulePair) {
        let chain = &self.config.chain;

        if let Err(e) = self.gateway.delete_dnat_rule(&rules.dnat, chain).await {
            warn!(chain = %chain, rule = %rules.dnat, error = %e, "Failed to delete rule");
            self.stats.firewall_errors += 1;
        }
        if let Err(e) = self.gateway.delete_snat_rule(&rules.snat, chain).await {
            warn!(chain = %chain, rule = %rules.snat, error = %e, "Failed to delete rule");
            self.stats.firewall_errors += 1;
        }
    }

    /// Configure the chain, then apply events until the feed ends or
    /// `cancel` fires
    ///
    /// Cancellation is only observed between events. Rules already applied
    /// stay in place.
    pub async fn run<S>(&mut self, feed: S, cancel: CancellationToken) -> AgentResult<RunStats>
    where
        S: Stream<Item = DiscoveryEvent> + Unpin,
    {
        self.run_feed(feed.map(Ok::<_, AgentError>), cancel).await
    }

    /// Like [`VRingMgr::run`] for a feed that can fail
    ///
    /// A feed error ends the run and is returned to the caller.
    pub async fn run_feed<S>(&mut self, mut feed: S, cancel: CancellationToken) -> AgentResult<RunStats>
    where
        S: Stream<Item = AgentResult<DiscoveryEvent>> + Unpin,
    {
        if self.state == VRingState::Uninitialized {
            self.configure().await?;
        }
        self.state = VRingState::Running;
        info!("VRing {} running", self.config.chain);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("VRing {} cancelled", self.config.chain);
                    self.stats.stop = StopReason::Cancelled;
                    break;
                }
                next = feed.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!(
                        chain = %self.config.chain,
                        events = self.stats.events,
                        error = %e,
                        "Discovery feed failed"
                    );
                    self.state = VRingState::Terminated;
                    return Err(e);
                }
                None => {
                    info!("Discovery feed for {} ended", self.config.chain);
                    self.stats.stop = StopReason::FeedEnded;
                    break;
                }
            };

            self.process_event(&event).await;
        }

        self.state = VRingState::Terminated;
        Ok(self.stats.clone())
    }
}

/// Run a ring to completion
///
/// Returns once `feed` ends or `cancel` fires. Failure to configure the
/// chain is returned before any event is read.
pub async fn run<G, R, S>(
    config: VRingConfig,
    feed: S,
    gateway: G,
    resolver: R,
    cancel: CancellationToken,
) -> AgentResult<RunStats>
where
    G: FirewallGateway,
    R: HostResolver,
    S: Stream<Item = DiscoveryEvent> + Unpin,
{
    config.validate()?;
    VRingMgr::new(config, gateway, resolver).run(feed, cancel).await
}
