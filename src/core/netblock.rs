// src/core/netblock.rs
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use ipnetwork::IpNetwork;
use tracing::debug;

/// Drop host bits so that `8.8.8.5/24` and `8.8.8.0/24` compare equal
pub fn normalize(block: IpNetwork) -> IpNetwork {
    IpNetwork::new(block.network(), block.prefix()).unwrap_or(block)
}

/// Parse a CIDR string, rejecting bare addresses and malformed input
pub fn parse_cidr(input: &str) -> Option<IpNetwork> {
    let input = input.trim();
    if !input.contains('/') {
        return None;
    }

    match IpNetwork::from_str(input) {
        Ok(block) => Some(normalize(block)),
        Err(e) => {
            debug!("Skipping malformed CIDR {}: {}", input, e);
            None
        }
    }
}

/// Parse every CIDR in `inputs`, skipping the malformed ones
pub fn parse_all<I, S>(inputs: I) -> BTreeSet<IpNetwork>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    inputs
        .into_iter()
        .filter_map(|s| parse_cidr(s.as_ref()))
        .collect()
}

/// First netblock (canonical order) containing `addr`
pub fn containing(netblocks: &BTreeSet<IpNetwork>, addr: IpAddr) -> Option<IpNetwork> {
    netblocks.iter().find(|block| block.contains(addr)).copied()
}

/// Prefix selection: the block containing the address if one is known,
/// otherwise the first block in canonical order
pub fn select_prefix(netblocks: &BTreeSet<IpNetwork>, addr: Option<IpAddr>) -> Option<IpNetwork> {
    match addr {
        Some(addr) => containing(netblocks, addr).or_else(|| netblocks.iter().next().copied()),
        None => netblocks.iter().next().copied(),
    }
}

/// First and last address of a block
pub fn first_last(block: &IpNetwork) -> (IpAddr, IpAddr) {
    match block {
        IpNetwork::V4(net) => {
            let first = u32::from(net.network());
            let host_bits = 32 - u32::from(net.prefix());
            let last = if host_bits >= 32 { u32::MAX } else { first | ((1u32 << host_bits) - 1) };
            (IpAddr::V4(Ipv4Addr::from(first)), IpAddr::V4(Ipv4Addr::from(last)))
        }
        IpNetwork::V6(net) => {
            let first = u128::from(net.network());
            let host_bits = 128 - u32::from(net.prefix());
            let last = if host_bits >= 128 { u128::MAX } else { first | ((1u128 << host_bits) - 1) };
            (IpAddr::V6(Ipv6Addr::from(first)), IpAddr::V6(Ipv6Addr::from(last)))
        }
    }
}
