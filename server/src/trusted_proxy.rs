//! Trusted-proxy CIDR matching.
//!
//! Per spec.md §9 DESIGN NOTES, trusted-proxy configuration is immutable
//! after startup: parsed once from `TRUSTED_PROXIES` into this list, never
//! mutated again. `dispatcher::attribute_client_ip` consults
//! `TrustedProxies::contains` against the direct peer address on every
//! public request to decide whether its `X-Forwarded-For`/`X-Real-IP` can
//! be trusted, or must be overwritten with the peer's own address.

use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct CidrBlock {
    network: IpAddr,
    prefix_len: u8,
}

#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    blocks: Vec<CidrBlock>,
}

impl TrustedProxies {
    pub fn parse(entries: &[String]) -> anyhow::Result<Self> {
        let mut blocks = Vec::with_capacity(entries.len());
        for entry in entries {
            blocks.push(parse_cidr(entry)?);
        }
        Ok(Self { blocks })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.blocks.iter().any(|b| b.contains(addr))
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn parse_cidr(entry: &str) -> anyhow::Result<CidrBlock> {
    let (addr_part, prefix_part) = match entry.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (entry, None),
    };
    let network: IpAddr = addr_part
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid trusted-proxy address '{entry}': {e}"))?;
    let max_len = match network {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    let prefix_len = match prefix_part {
        Some(p) => p
            .parse::<u8>()
            .map_err(|e| anyhow::anyhow!("invalid CIDR prefix in '{entry}': {e}"))?,
        None => max_len,
    };
    if prefix_len > max_len {
        anyhow::bail!("CIDR prefix {prefix_len} out of range for '{entry}'");
    }
    Ok(CidrBlock {
        network,
        prefix_len,
    })
}

impl CidrBlock {
    fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(a)) => {
                let mask = mask_u32(self.prefix_len);
                u32::from(net) & mask == u32::from(a) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                let mask = mask_u128(self.prefix_len);
                u128::from(net) & mask == u128::from(a) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

fn mask_u128(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - prefix_len as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_address_with_no_prefix() {
        let tp = TrustedProxies::parse(&["10.0.0.5".to_string()]).unwrap();
        assert!(tp.contains("10.0.0.5".parse().unwrap()));
        assert!(!tp.contains("10.0.0.6".parse().unwrap()));
    }

    #[test]
    fn matches_cidr_range() {
        let tp = TrustedProxies::parse(&["10.0.0.0/8".to_string()]).unwrap();
        assert!(tp.contains("10.1.2.3".parse().unwrap()));
        assert!(!tp.contains("11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn matches_ipv6_range() {
        let tp = TrustedProxies::parse(&["fd00::/8".to_string()]).unwrap();
        assert!(tp.contains("fd00::1".parse().unwrap()));
        assert!(!tp.contains("fe80::1".parse().unwrap()));
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(TrustedProxies::parse(&["not-an-ip".to_string()]).is_err());
        assert!(TrustedProxies::parse(&["10.0.0.0/99".to_string()]).is_err());
    }

    #[test]
    fn empty_list_matches_nothing() {
        let tp = TrustedProxies::default();
        assert!(tp.is_empty());
        assert!(!tp.contains("1.2.3.4".parse().unwrap()));
    }
}
