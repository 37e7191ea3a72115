//! AS-006: Address-block layout. AZ selection and sequential subnet allocation.
//!
//! Subnets are carved from the VPC block group by group, and within a group
//! AZ by AZ, each aligned to its own size. The first group therefore owns the
//! lowest addresses. Allocation fails instead of wrapping when the block is
//! exhausted.

use super::types::{NetworkConfig, SubnetGroupConfig, SubnetType};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Largest subnet (and VPC block) AWS accepts.
pub const MIN_SUBNET_PREFIX: u8 = 16;

/// Smallest subnet (and VPC block) AWS accepts.
pub const MAX_SUBNET_PREFIX: u8 = 28;

/// One allocated subnet, before it gets a logical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedSubnet {
    pub group: String,
    pub subnet_type: SubnetType,
    pub az_index: usize,
    pub availability_zone: String,
    pub cidr: Ipv4Network,
}

/// Parse and check a VPC address block.
pub fn parse_block(cidr: &str) -> Result<Ipv4Network, String> {
    let block: Ipv4Network = cidr
        .trim()
        .parse()
        .map_err(|e| format!("invalid CIDR '{}': {}", cidr, e))?;
    if block.ip() != block.network() {
        return Err(format!(
            "CIDR '{}' has host bits set (network address is {})",
            cidr,
            block.network()
        ));
    }
    if !(MIN_SUBNET_PREFIX..=MAX_SUBNET_PREFIX).contains(&block.prefix()) {
        return Err(format!(
            "CIDR '{}' prefix must be between /{} and /{}",
            cidr, MIN_SUBNET_PREFIX, MAX_SUBNET_PREFIX
        ));
    }
    Ok(block)
}

/// Availability zones used by the stack: the explicit list, or `<region>a`,
/// `<region>b`, ... truncated to `max_azs`.
pub fn availability_zones(net: &NetworkConfig, region: &str) -> Vec<String> {
    let count = net.max_azs as usize;
    if !net.availability_zones.is_empty() {
        return net.availability_zones.iter().take(count).cloned().collect();
    }
    (b'a'..=b'z')
        .take(count)
        .map(|letter| format!("{}{}", region, letter as char))
        .collect()
}

fn block_size(prefix: u8) -> u64 {
    1u64 << (32 - u32::from(prefix))
}

/// Allocate one subnet per (group, AZ) pair, groups in declaration order.
pub fn allocate_subnets(
    block: Ipv4Network,
    groups: &[SubnetGroupConfig],
    zones: &[String],
) -> Result<Vec<AllocatedSubnet>, String> {
    let start = u64::from(u32::from(block.network()));
    let end = start + block_size(block.prefix());
    let mut cursor = start;
    let mut allocated = Vec::with_capacity(groups.len() * zones.len());

    for group in groups {
        if group.cidr_mask < block.prefix() || group.cidr_mask > 32 {
            return Err(format!(
                "subnet group '{}' /{} does not fit in {}",
                group.name, group.cidr_mask, block
            ));
        }
        let size = block_size(group.cidr_mask);
        for (az_index, zone) in zones.iter().enumerate() {
            // Align up to the subnet's own boundary
            cursor = cursor.div_ceil(size) * size;
            if cursor + size > end {
                return Err(format!(
                    "address block {} exhausted allocating /{} for group '{}' in {}",
                    block, group.cidr_mask, group.name, zone
                ));
            }
            let addr = Ipv4Addr::from(cursor as u32);
            let cidr = Ipv4Network::new(addr, group.cidr_mask)
                .map_err(|e| format!("cannot build subnet {}/{}: {}", addr, group.cidr_mask, e))?;
            allocated.push(AllocatedSubnet {
                group: group.name.clone(),
                subnet_type: group.subnet_type,
                az_index,
                availability_zone: zone.clone(),
                cidr,
            });
            cursor += size;
        }
    }

    Ok(allocated)
}

/// True when two networks share any address.
pub fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    let a_start = u64::from(u32::from(a.network()));
    let b_start = u64::from(u32::from(b.network()));
    let a_end = a_start + block_size(a.prefix());
    let b_end = b_start + block_size(b.prefix());
    a_start < b_end && b_start < a_end
}

/// True when `inner` lies entirely inside `outer`.
pub fn contains(outer: &Ipv4Network, inner: &Ipv4Network) -> bool {
    let o_start = u64::from(u32::from(outer.network()));
    let i_start = u64::from(u32::from(inner.network()));
    i_start >= o_start
        && i_start + block_size(inner.prefix()) <= o_start + block_size(outer.prefix())
}

/// Check layout invariants of an allocation: inside the block, pairwise
/// disjoint. Returns human-readable violations.
pub fn check_layout(block: &Ipv4Network, subnets: &[AllocatedSubnet]) -> Vec<String> {
    let mut problems = Vec::new();
    for (i, s) in subnets.iter().enumerate() {
        if !contains(block, &s.cidr) {
            problems.push(format!("subnet {} lies outside {}", s.cidr, block));
        }
        for other in &subnets[i + 1..] {
            if overlaps(&s.cidr, &other.cidr) {
                problems.push(format!("subnet {} overlaps {}", s.cidr, other.cidr));
            }
        }
    }
    problems
}
