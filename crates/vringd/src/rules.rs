//! NAT rule value types
//!
//! A virtual ring translates each peer's virtual port to the port it really
//! listens on. The translation is a DNAT rule for outbound traffic and the
//! mirrored SNAT rule so replies come back from the virtual port.

use std::fmt;
use std::net::Ipv4Addr;

use crate::types::Protocol;

/// Destination NAT: `(from_ip, from_port)` is rewritten to `(to_ip, to_port)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DnatRule {
    pub protocol: Protocol,
    pub from_ip: Ipv4Addr,
    pub from_port: u16,
    pub to_ip: Ipv4Addr,
    pub to_port: u16,
}

impl DnatRule {
    pub fn new(
        protocol: Protocol,
        from_ip: Ipv4Addr,
        from_port: u16,
        to_ip: Ipv4Addr,
        to_port: u16,
    ) -> Self {
        Self {
            protocol,
            from_ip,
            from_port,
            to_ip,
            to_port,
        }
    }
}

impl fmt::Display for DnatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DNAT {} {}:{} -> {}:{}",
            self.protocol, self.from_ip, self.from_port, self.to_ip, self.to_port
        )
    }
}

/// Source NAT: `(from_ip, from_port)` is rewritten to `(to_ip, to_port)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnatRule {
    pub protocol: Protocol,
    pub from_ip: Ipv4Addr,
    pub from_port: u16,
    pub to_ip: Ipv4Addr,
    pub to_port: u16,
}

impl SnatRule {
    pub fn new(
        protocol: Protocol,
        from_ip: Ipv4Addr,
        from_port: u16,
        to_ip: Ipv4Addr,
        to_port: u16,
    ) -> Self {
        Self {
            protocol,
            from_ip,
            from_port,
            to_ip,
            to_port,
        }
    }
}

impl fmt::Display for SnatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SNAT {} {}:{} -> {}:{}",
            self.protocol, self.from_ip, self.from_port, self.to_ip, self.to_port
        )
    }
}

/// The DNAT/SNAT pair installed for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NatRulePair {
    pub dnat: DnatRule,
    pub snat: SnatRule,
}

impl NatRulePair {
    /// Builds the pair for a peer at `ip` whose `virtual_port` maps to
    /// `real_port`
    pub fn new(protocol: Protocol, ip: Ipv4Addr, virtual_port: u16, real_port: u16) -> Self {
        Self {
            dnat: DnatRule::new(protocol, ip, virtual_port, ip, real_port),
            snat: SnatRule::new(protocol, ip, real_port, ip, virtual_port),
        }
    }
}

/// What the reconciler remembers about an applied endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VRingRoute {
    pub ip: Ipv4Addr,
    pub real_port: u16,
    pub protocol: Protocol,
    pub virtual_port: u16,
}

impl VRingRoute {
    pub fn rules(&self) -> NatRulePair {
        NatRulePair::new(self.protocol, self.ip, self.virtual_port, self.real_port)
    }
}

impl fmt::Display for VRingRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} <-> {}",
            self.protocol, self.ip, self.virtual_port, self.real_port
        )
    }
}
