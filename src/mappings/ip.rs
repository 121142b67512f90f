//! IPv4 address generator.
//!
//! Synthetic addresses live in `100.0.0.0` – `126.255.255.255`. A CIDR input
//! reserves a whole block of the same size, so hosts of a known network keep
//! their offset and stay inside the obfuscated subnet. Hosts outside of any
//! known network draw single addresses from the same cursor.

use super::Generator;
use std::any::Any;
use std::net::Ipv4Addr;

const SYNTHETIC_START: u32 = 100 << 24;
const SYNTHETIC_END: u32 = 127 << 24; // exclusive; never hand out loopback
/// Shorter prefixes are too large to mirror inside the synthetic space.
const MIN_NETWORK_PREFIX: u8 = 8;

/// Parse `a.b.c.d` or `a.b.c.d/len`.
pub fn parse_ipv4(item: &str) -> Option<(Ipv4Addr, Option<u8>)> {
    let (addr, prefix) = match item.split_once('/') {
        Some((a, p)) => (a, Some(p.parse::<u8>().ok().filter(|p| *p <= 32)?)),
        None => (item, None),
    };
    Some((addr.parse::<Ipv4Addr>().ok()?, prefix))
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

/// Contiguous netmasks like `255.255.254.0` are configuration, not identity.
fn is_netmask(addr: u32) -> bool {
    addr >> 24 == 0xFF && addr.leading_ones() + addr.trailing_zeros() == 32
}

#[derive(Debug, Clone, Copy)]
struct NetworkMapping {
    network: u32,
    prefix: u8,
    synthetic: u32,
}

#[derive(Debug, Clone)]
pub struct IpGenerator {
    networks: Vec<NetworkMapping>,
    cursor: u32,
}

impl Default for IpGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IpGenerator {
    pub fn new() -> Self {
        Self {
            networks: Vec::new(),
            cursor: SYNTHETIC_START,
        }
    }

    fn find_network(&self, addr: u32, prefix: Option<u8>) -> Option<NetworkMapping> {
        self.networks
            .iter()
            .filter(|n| prefix.map_or(true, |p| p == n.prefix))
            .filter(|n| addr & mask(n.prefix) == n.network)
            .max_by_key(|n| n.prefix)
            .copied()
    }

    fn allocate_network(&mut self, network: u32, prefix: u8) -> Option<NetworkMapping> {
        let size = 1u64 << (32 - prefix as u32);
        let start = (self.cursor as u64).div_ceil(size) * size;
        let end = start + size;
        if end > SYNTHETIC_END as u64 {
            return None;
        }
        self.cursor = end as u32;
        let mapping = NetworkMapping {
            network,
            prefix,
            synthetic: start as u32,
        };
        self.networks.push(mapping);
        Some(mapping)
    }

    fn allocate_host(&mut self) -> Option<u32> {
        while self.cursor < SYNTHETIC_END {
            let candidate = self.cursor;
            self.cursor += 1;
            let last = candidate & 0xFF;
            if last != 0 && last != 0xFF {
                return Some(candidate);
            }
        }
        None
    }

    fn network_prefix(prefix: Option<u8>) -> Option<u8> {
        prefix.filter(|p| (MIN_NETWORK_PREFIX..32).contains(p))
    }
}

impl Generator for IpGenerator {
    fn ignore(&self, item: &str) -> bool {
        let Some((addr, _)) = parse_ipv4(item.trim()) else {
            return true;
        };
        addr.is_loopback()
            || addr.is_unspecified()
            || addr.is_broadcast()
            || is_netmask(u32::from(addr))
    }

    fn normalize(&self, item: &str) -> String {
        match parse_ipv4(item.trim()) {
            Some((addr, Some(p))) => format!("{addr}/{p}"),
            Some((addr, None)) => addr.to_string(),
            None => item.trim().to_string(),
        }
    }

    fn generate(&mut self, key: &str, attempt: u32) -> Option<String> {
        let (addr, prefix) = parse_ipv4(key)?;
        let addr = u32::from(addr);
        let suffix = prefix.map(|p| format!("/{p}")).unwrap_or_default();

        if attempt == 0 {
            if let Some(p) = Self::network_prefix(prefix) {
                let network = addr & mask(p);
                let mapping = match self.find_network(network, Some(p)) {
                    Some(m) => m,
                    None => self.allocate_network(network, p)?,
                };
                let host = addr & !mask(p);
                return Some(format!("{}{suffix}", Ipv4Addr::from(mapping.synthetic | host)));
            }
            if let Some(mapping) = self.find_network(addr, None) {
                let host = addr & !mask(mapping.prefix);
                return Some(format!("{}{suffix}", Ipv4Addr::from(mapping.synthetic | host)));
            }
        }

        let host = self.allocate_host()?;
        Some(format!("{}{suffix}", Ipv4Addr::from(host)))
    }

    fn observe(&mut self, key: &str, synthetic: &str) {
        let (Some((real, real_prefix)), Some((syn, _))) = (parse_ipv4(key), parse_ipv4(synthetic))
        else {
            return;
        };
        let syn = u32::from(syn);
        if !(SYNTHETIC_START..SYNTHETIC_END).contains(&syn) {
            return;
        }
        match Self::network_prefix(real_prefix) {
            Some(p) => {
                let network = u32::from(real) & mask(p);
                let syn_network = syn & mask(p);
                if self.find_network(network, Some(p)).is_none() {
                    self.networks.push(NetworkMapping {
                        network,
                        prefix: p,
                        synthetic: syn_network,
                    });
                }
                let block_end = syn_network as u64 + (1u64 << (32 - p as u32));
                self.cursor = self.cursor.max(block_end.min(SYNTHETIC_END as u64) as u32);
            }
            None => {
                self.cursor = self.cursor.max(syn.saturating_add(1));
            }
        }
    }

    fn accepts(&self, key: &str, synthetic: &str) -> bool {
        parse_ipv4(key).is_some() && parse_ipv4(synthetic).is_some()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
