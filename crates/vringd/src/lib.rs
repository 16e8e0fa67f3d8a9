//! VRing Daemon - virtual ring NAT reconciler
//!
//! vringd keeps a container's virtual ring chain in sync with discovery:
//! - Endpoint key/value parsing for discovery records
//! - DNAT/SNAT rule pairs translating virtual ports to real ports
//! - Hostname resolution with a skip list
//! - iptables chain and rule management
//! - Cooperative cancellation between events

pub mod commands;
pub mod config;
pub mod discovery;
pub mod firewall;
pub mod resolver;
pub mod rules;
pub mod types;
pub mod vring_mgr;

pub use config::{VRingConfig, VRingDaemonConfig};
pub use firewall::{FirewallGateway, IptablesGateway};
pub use resolver::{HostResolver, SystemResolver};
pub use rules::{DnatRule, NatRulePair, SnatRule};
pub use types::{DiscoveryEvent, Protocol};
pub use vring_mgr::{run, EventOutcome, RunStats, StopReason, VRingMgr, VRingState};
