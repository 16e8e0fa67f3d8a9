//! iptables command builders for virtual ring rules

use treadmill_agent_common::shell;

use crate::rules::{DnatRule, SnatRule};

/// Table holding all virtual ring rules
pub const NAT_TABLE: &str = "nat";

/// iptables rule-level operation flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// `-C`: exits 0 when the rule is present
    Check,
    /// `-A`
    Append,
    /// `-D`
    Delete,
}

impl RuleOp {
    fn flag(&self) -> &'static str {
        match self {
            RuleOp::Check => "-C",
            RuleOp::Append => "-A",
            RuleOp::Delete => "-D",
        }
    }
}

/// Build the iptables invocation prefix, e.g. `/sbin/iptables -w`
pub fn build_iptables_prefix(command: &str, wait: bool) -> String {
    if wait {
        format!("{} -w", command)
    } else {
        command.to_string()
    }
}

/// Match/target arguments of a DNAT rule
pub fn dnat_rule_spec(rule: &DnatRule) -> String {
    format!(
        "-d {} -p {} -m {} --dport {} -j DNAT --to-destination {}:{}",
        rule.from_ip,
        rule.protocol,
        rule.protocol,
        rule.from_port,
        rule.to_ip,
        rule.to_port
    )
}

/// Match/target arguments of a SNAT rule
pub fn snat_rule_spec(rule: &SnatRule) -> String {
    format!(
        "-s {} -p {} -m {} --sport {} -j SNAT --to-source {}:{}",
        rule.from_ip,
        rule.protocol,
        rule.protocol,
        rule.from_port,
        rule.to_ip,
        rule.to_port
    )
}

/// Build a check/append/delete command for a rule spec in the nat table
///
/// The spec is built from typed addresses and ports only, so just the chain
/// name needs quoting.
pub fn build_rule_cmd(iptables: &str, op: RuleOp, chain: &str, spec: &str) -> String {
    format!(
        "{} -t {} {} {} {}",
        iptables,
        NAT_TABLE,
        op.flag(),
        shell::shellquote(chain),
        spec
    )
}

/// Build the chain existence probe
pub fn build_list_chain_cmd(iptables: &str, chain: &str) -> String {
    format!(
        "{} -t {} -n -L {}",
        iptables,
        NAT_TABLE,
        shell::shellquote(chain)
    )
}

/// Build the chain creation command
pub fn build_new_chain_cmd(iptables: &str, chain: &str) -> String {
    format!(
        "{} -t {} -N {}",
        iptables,
        NAT_TABLE,
        shell::shellquote(chain)
    )
}
