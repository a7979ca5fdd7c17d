// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Port classification and loopback pairing
//!
//! The physical switch reports a flat list of `(name, number)` ports. Ports
//! following the reserved loopback naming convention form pairs that emulate
//! a direct link between two principals; everything else is a physical port.
//! Pairing indices are contiguous from 0, and a half without its partner is
//! a fatal configuration error.

use crate::error::ConfigError;
use crate::wire::PortDesc;
use std::collections::{BTreeMap, HashMap};

/// Reserved prefix of loopback half-port names
pub const LOOPBACK_PORT_PREFIX: &str = "loopback_";

/// Name of the `a` half of loopback pair `pair`
pub fn loopback_port_a(pair: usize) -> String {
    format!("{LOOPBACK_PORT_PREFIX}{pair}_a")
}

/// Name of the `b` half of loopback pair `pair`
pub fn loopback_port_b(pair: usize) -> String {
    format!("{LOOPBACK_PORT_PREFIX}{pair}_b")
}

/// True when the port name follows the loopback convention
pub fn is_loopback_port(name: &str) -> bool {
    name.starts_with(LOOPBACK_PORT_PREFIX)
}

/// Number of loopback pairs needed so every pair of principals gets one
///
/// One pair per unordered pair of principals: n choose 2.
pub fn pairs_for_principals(num_principals: usize) -> usize {
    num_principals * num_principals.saturating_sub(1) / 2
}

/// Number of principals a given pair count can support
///
/// Inverse of [`pairs_for_principals`]: the largest n with n(n-1)/2 <= pairs.
pub fn principals_for_pairs(num_pairs: usize) -> usize {
    let mut n = 1usize;
    while pairs_for_principals(n + 1) <= num_pairs {
        n += 1;
    }
    n
}

/// Port classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Physical,
    Logical,
}

/// A switch port annotated with its classification
///
/// Created once from the port description reply and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub number: u32,
    pub kind: PortKind,
    /// Port number of the paired half; set exactly for logical ports
    pub partner: Option<u32>,
}

/// One loopback pair, identified by the port numbers of its halves
///
/// `a` is the canonical half: iterating a pair list yields each pair once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackPair {
    pub a: u32,
    pub b: u32,
}

/// Result of classifying the switch's reported port list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPorts {
    pub ports: Vec<Port>,
    pub pairs: Vec<LoopbackPair>,
    /// Highest port number the switch reported; virtual port numbering in
    /// the chained-table scheme starts one above this
    pub highest_port_number: u32,
}

/// Classifies reported ports as physical or logical and pairs the halves
///
/// Pairing indices are scanned in increasing order and the scan stops at the
/// first index where neither half exists. Exactly one half present, or a
/// loopback-named port beyond the terminal index, is fatal.
pub fn classify_ports(descs: &[PortDesc]) -> Result<ClassifiedPorts, ConfigError> {
    let by_name: HashMap<&str, &PortDesc> =
        descs.iter().map(|d| (d.name.as_str(), d)).collect();

    let mut partners: BTreeMap<u32, u32> = BTreeMap::new();
    let mut pairs = Vec::new();
    let mut pair_index = 0;
    loop {
        let half_a = by_name.get(loopback_port_a(pair_index).as_str());
        let half_b = by_name.get(loopback_port_b(pair_index).as_str());
        match (half_a, half_b) {
            (None, None) => break,
            (Some(a), Some(b)) => {
                partners.insert(a.number, b.number);
                partners.insert(b.number, a.number);
                pairs.push(LoopbackPair {
                    a: a.number,
                    b: b.number,
                });
            }
            _ => return Err(ConfigError::UnmatchedLoopback { pair: pair_index }),
        }
        pair_index += 1;
    }

    let mut ports = Vec::with_capacity(descs.len());
    let mut highest_port_number = 0;
    for desc in descs {
        highest_port_number = highest_port_number.max(desc.number);
        if is_loopback_port(&desc.name) {
            let partner = partners
                .get(&desc.number)
                .copied()
                .ok_or(ConfigError::UnmatchedLoopback {
                    pair: pair_index_from_name(&desc.name).unwrap_or(pair_index),
                })?;
            ports.push(Port {
                name: desc.name.clone(),
                number: desc.number,
                kind: PortKind::Logical,
                partner: Some(partner),
            });
        } else {
            ports.push(Port {
                name: desc.name.clone(),
                number: desc.number,
                kind: PortKind::Physical,
                partner: None,
            });
        }
    }

    Ok(ClassifiedPorts {
        ports,
        pairs,
        highest_port_number,
    })
}

fn pair_index_from_name(name: &str) -> Option<usize> {
    name.strip_prefix(LOOPBACK_PORT_PREFIX)?
        .split('_')
        .next()?
        .parse()
        .ok()
}
