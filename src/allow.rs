use std::net::IpAddr;

use crate::config::AllowRuleConfig;

/// A single allow-list rule, resolved to address-family-aware matching logic.
#[derive(Debug, Clone)]
pub enum AllowRule {
    All,
    Exact(IpAddr),
    Network { addr: IpAddr, prefix_len: u8 },
}

impl AllowRule {
    /// An invalid rule never matches but is kept so that config-parse errors
    /// stay visible instead of silently dropping the whole block.
    fn from_config(rule: &AllowRuleConfig) -> Self {
        match rule {
            AllowRuleConfig::All => AllowRule::All,
            AllowRuleConfig::Exact(s) => match s.parse() {
                Ok(addr) => AllowRule::Exact(addr),
                Err(_) => AllowRule::invalid(),
            },
            AllowRuleConfig::Network(addr, mask) => match addr.parse::<IpAddr>() {
                Ok(addr) => match parse_prefix_len(&addr, mask) {
                    Some(prefix_len) => AllowRule::Network { addr, prefix_len },
                    None => AllowRule::invalid(),
                },
                Err(_) => AllowRule::invalid(),
            },
        }
    }

    fn invalid() -> Self {
        // An address that can never equal or contain a real source address.
        AllowRule::Exact(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED))
    }

    fn matches(&self, src: IpAddr) -> bool {
        match self {
            AllowRule::All => true,
            AllowRule::Exact(addr) => *addr == src,
            AllowRule::Network { addr, prefix_len } => network_contains(*addr, *prefix_len, src),
        }
    }
}

fn parse_prefix_len(addr: &IpAddr, mask: &str) -> Option<u8> {
    if let Ok(n) = mask.parse::<u8>() {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if n <= max {
            return Some(n);
        }
        return None;
    }
    // Dotted-quad netmask, IPv4 only.
    let mask_addr: std::net::Ipv4Addr = mask.parse().ok()?;
    Some(u32::from(mask_addr).count_ones() as u8)
}

fn network_contains(net_addr: IpAddr, prefix_len: u8, candidate: IpAddr) -> bool {
    match (net_addr, candidate) {
        (IpAddr::V4(net), IpAddr::V4(cand)) => {
            let mask = prefix_mask_v4(prefix_len);
            (u32::from(net) & mask) == (u32::from(cand) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(cand)) => {
            let mask = prefix_mask_v6(prefix_len);
            let net_bits = u128::from(net) & mask;
            let cand_bits = u128::from(cand) & mask;
            net_bits == cand_bits
        }
        _ => false,
    }
}

fn prefix_mask_v4(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - len as u32)
    }
}

fn prefix_mask_v6(len: u8) -> u128 {
    if len == 0 {
        0
    } else {
        u128::MAX << (128 - len as u32)
    }
}

/// Matches a source address against the configured rule set. Pure function of
/// the current ruleset and the address under test.
#[derive(Debug, Clone, Default)]
pub struct AllowListMatcher {
    rules: Vec<AllowRule>,
}

impl AllowListMatcher {
    pub fn from_config(rules: &[AllowRuleConfig]) -> Self {
        Self { rules: rules.iter().map(AllowRule::from_config).collect() }
    }

    /// Returns true when the rule list is empty or contains "all", or the
    /// address matches any configured rule.
    pub fn allowed(&self, src: IpAddr) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|r| r.matches(src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ruleset_allows_everything() {
        let m = AllowListMatcher::from_config(&[]);
        assert!(m.allowed("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn network_rule_matches_subnet_only() {
        let m = AllowListMatcher::from_config(&[AllowRuleConfig::Network(
            "10.0.0.0".to_string(),
            "8".to_string(),
        )]);
        assert!(m.allowed("10.1.2.3".parse().unwrap()));
        assert!(!m.allowed("192.168.1.5".parse().unwrap()));
    }

    #[test]
    fn exact_rule_matches_one_host() {
        let m = AllowListMatcher::from_config(&[AllowRuleConfig::Exact("192.168.1.5".to_string())]);
        assert!(m.allowed("192.168.1.5".parse().unwrap()));
        assert!(!m.allowed("192.168.1.6".parse().unwrap()));
    }

    #[test]
    fn invalid_rule_never_matches() {
        let m = AllowListMatcher::from_config(&[AllowRuleConfig::Exact("not-an-ip".to_string())]);
        assert!(!m.allowed("10.0.0.1".parse().unwrap()));
    }
}
