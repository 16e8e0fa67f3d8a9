//! Firewall gateway used by the reconciler
//!
//! The reconciler only ever talks to [`FirewallGateway`]; [`IptablesGateway`]
//! is the production backend that shells out to `iptables`.

#[cfg(test)]
use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info};
use treadmill_agent_common::{shell, AgentResult};

use crate::commands::*;
use crate::rules::{DnatRule, SnatRule};

/// NAT primitives scoped to a chain
///
/// Adds and deletes must be idempotent per rule: adding a present rule or
/// deleting an absent one is a successful no-op.
#[async_trait]
pub trait FirewallGateway: Send {
    /// Prepare `chain` to hold ring rules
    async fn configure_nat_rules(&mut self, chain: &str) -> AgentResult<()>;

    async fn add_dnat_rule(&mut self, rule: &DnatRule, chain: &str) -> AgentResult<()>;

    async fn add_snat_rule(&mut self, rule: &SnatRule, chain: &str) -> AgentResult<()>;

    async fn delete_dnat_rule(&mut self, rule: &DnatRule, chain: &str) -> AgentResult<()>;

    async fn delete_snat_rule(&mut self, rule: &SnatRule, chain: &str) -> AgentResult<()>;
}

/// iptables-backed gateway
pub struct IptablesGateway {
    /// Invocation prefix, e.g. `/sbin/iptables -w`
    iptables: String,

    #[cfg(test)]
    mock_mode: bool,

    #[cfg(test)]
    captured_commands: Vec<String>,

    /// Simulated kernel state in mock mode: chains and `(chain, spec)` rules
    #[cfg(test)]
    mock_chains: HashSet<String>,

    #[cfg(test)]
    mock_rules: HashSet<(String, String)>,
}

impl IptablesGateway {
    /// Create a gateway for the given iptables binary
    pub fn new(command: &str, wait: bool) -> Self {
        Self {
            iptables: build_iptables_prefix(command, wait),
            #[cfg(test)]
            mock_mode: false,
            #[cfg(test)]
            captured_commands: Vec::new(),
            #[cfg(test)]
            mock_chains: HashSet::new(),
            #[cfg(test)]
            mock_rules: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn new_mock() -> Self {
        let mut gw = Self::new("iptables", true);
        gw.mock_mode = true;
        gw
    }

    #[cfg(test)]
    pub fn get_captured_commands(&self) -> &[String] {
        &self.captured_commands
    }

    /// Returns true if the probe command exits 0
    async fn probe(&self, cmd: &str) -> AgentResult<bool> {
        Ok(shell::exec(cmd).await?.success())
    }

    /// Execute shell command (or capture in mock mode)
    async fn exec(&mut self, cmd: &str) -> AgentResult<String> {
        #[cfg(test)]
        if self.mock_mode {
            self.captured_commands.push(cmd.to_string());
            return Ok(String::new());
        }

        shell::exec_or_throw(cmd).await
    }

    async fn chain_exists(&mut self, chain: &str) -> AgentResult<bool> {
        let cmd = build_list_chain_cmd(&self.iptables, chain);

        #[cfg(test)]
        if self.mock_mode {
            self.captured_commands.push(cmd);
            return Ok(self.mock_chains.contains(chain));
        }

        self.probe(&cmd).await
    }

    async fn rule_exists(&mut self, chain: &str, spec: &str) -> AgentResult<bool> {
        let cmd = build_rule_cmd(&self.iptables, RuleOp::Check, chain, spec);

        #[cfg(test)]
        if self.mock_mode {
            self.captured_commands.push(cmd);
            return Ok(self
                .mock_rules
                .contains(&(chain.to_string(), spec.to_string())));
        }

        self.probe(&cmd).await
    }

    /// Append `spec` unless an identical rule is already in the chain
    async fn ensure_rule(&mut self, chain: &str, spec: &str) -> AgentResult<bool> {
        if self.rule_exists(chain, spec).await? {
            debug!(chain = %chain, spec = %spec, "Rule already present");
            return Ok(false);
        }

        let cmd = build_rule_cmd(&self.iptables, RuleOp::Append, chain, spec);
        self.exec(&cmd).await?;

        #[cfg(test)]
        if self.mock_mode {
            self.mock_rules.insert((chain.to_string(), spec.to_string()));
        }

        Ok(true)
    }

    /// Delete `spec` if it is in the chain
    async fn remove_rule(&mut self, chain: &str, spec: &str) -> AgentResult<bool> {
        if !self.rule_exists(chain, spec).await? {
            debug!(chain = %chain, spec = %spec, "Rule already absent");
            return Ok(false);
        }

        let cmd = build_rule_cmd(&self.iptables, RuleOp::Delete, chain, spec);
        self.exec(&cmd).await?;

        #[cfg(test)]
        if self.mock_mode {
            self.mock_rules
                .remove(&(chain.to_string(), spec.to_string()));
        }

        Ok(true)
    }
}

#[async_trait]
impl FirewallGateway for IptablesGateway {
    async fn configure_nat_rules(&mut self, chain: &str) -> AgentResult<()> {
        if self.chain_exists(chain).await? {
            info!("NAT chain {} already exists", chain);
            return Ok(());
        }

        let cmd = build_new_chain_cmd(&self.iptables, chain);
        self.exec(&cmd).await?;

        #[cfg(test)]
        if self.mock_mode {
            self.mock_chains.insert(chain.to_string());
        }

        info!("NAT chain {} created", chain);
        Ok(())
    }

    async fn add_dnat_rule(&mut self, rule: &DnatRule, chain: &str) -> AgentResult<()> {
        self.ensure_rule(chain, &dnat_rule_spec(rule)).await?;
        Ok(())
    }

    async fn add_snat_rule(&mut self, rule: &SnatRule, chain: &str) -> AgentResult<()> {
        self.ensure_rule(chain, &snat_rule_spec(rule)).await?;
        Ok(())
    }

    async fn delete_dnat_rule(&mut self, rule: &DnatRule, chain: &str) -> AgentResult<()> {
        self.remove_rule(chain, &dnat_rule_spec(rule)).await?;
        Ok(())
    }

    async fn delete_snat_rule(&mut self, rule: &SnatRule, chain: &str) -> AgentResult<()> {
        self.remove_rule(chain, &snat_rule_spec(rule)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::NatRulePair;
    use crate::types::Protocol;
    use std::net::Ipv4Addr;

    fn pair() -> NatRulePair {
        NatRulePair::new(Protocol::Udp, Ipv4Addr::new(1, 1, 1, 1), 11000, 23456)
    }

    fn count(cmds: &[String], needle: &str) -> usize {
        cmds.iter().filter(|c| c.contains(needle)).count()
    }

    #[tokio::test]
    async fn test_configure_creates_chain_once() {
        let mut gw = IptablesGateway::new_mock();

        gw.configure_nat_rules("ring_0").await.unwrap();
        gw.configure_nat_rules("ring_0").await.unwrap();

        let cmds = gw.get_captured_commands();
        assert_eq!(count(cmds, "-t nat -n -L \"ring_0\""), 2);
        assert_eq!(count(cmds, "-t nat -N \"ring_0\""), 1);
    }

    #[tokio::test]
    async fn test_add_rule_is_idempotent() {
        let mut gw = IptablesGateway::new_mock();
        let rules = pair();

        gw.add_dnat_rule(&rules.dnat, "ring_0").await.unwrap();
        gw.add_dnat_rule(&rules.dnat, "ring_0").await.unwrap();

        let cmds = gw.get_captured_commands();
        assert_eq!(count(cmds, " -A \"ring_0\" "), 1);
        assert_eq!(count(cmds, " -C \"ring_0\" "), 2);
        assert!(cmds.iter().any(|c| c.contains(
            "-d 1.1.1.1 -p udp -m udp --dport 11000 -j DNAT --to-destination 1.1.1.1:23456"
        )));
    }

    #[tokio::test]
    async fn test_delete_absent_rule_is_noop() {
        let mut gw = IptablesGateway::new_mock();
        let rules = pair();

        gw.delete_snat_rule(&rules.snat, "ring_0").await.unwrap();

        let cmds = gw.get_captured_commands();
        assert_eq!(count(cmds, " -D "), 0);
    }

    #[tokio::test]
    async fn test_add_then_delete() {
        let mut gw = IptablesGateway::new_mock();
        let rules = pair();

        gw.add_snat_rule(&rules.snat, "ring_0").await.unwrap();
        gw.delete_snat_rule(&rules.snat, "ring_0").await.unwrap();
        gw.delete_snat_rule(&rules.snat, "ring_0").await.unwrap();

        let cmds = gw.get_captured_commands();
        assert_eq!(count(cmds, " -A \"ring_0\" "), 1);
        assert_eq!(count(cmds, " -D \"ring_0\" "), 1);
        assert!(cmds.iter().any(|c| c.contains(
            "-s 1.1.1.1 -p udp -m udp --sport 23456 -j SNAT --to-source 1.1.1.1:11000"
        )));
    }

    #[tokio::test]
    async fn test_rules_are_scoped_by_chain() {
        let mut gw = IptablesGateway::new_mock();
        let rules = pair();

        gw.add_dnat_rule(&rules.dnat, "ring_0").await.unwrap();
        gw.add_dnat_rule(&rules.dnat, "ring_1").await.unwrap();

        let cmds = gw.get_captured_commands();
        assert_eq!(count(cmds, " -A \"ring_0\" "), 1);
        assert_eq!(count(cmds, " -A \"ring_1\" "), 1);
    }

    #[tokio::test]
    async fn test_wait_flag_in_commands() {
        let mut gw = IptablesGateway::new_mock();
        gw.configure_nat_rules("ring_0").await.unwrap();
        assert!(gw
            .get_captured_commands()
            .iter()
            .all(|c| c.starts_with("iptables -w ")));
    }
}
