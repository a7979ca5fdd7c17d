// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Resource allocation across principals
//!
//! Runs exactly once during bring-up. Table 0 is reserved for the head
//! table; the remaining tables are floor-divided evenly among principals.
//! Uneven leftover tables stay unallocated. Depending on the configured
//! strategy, inter-principal links are realized either through physical
//! loopback port pairs or through early/late table chaining.

use crate::config::{PrincipalConfig, Strategy};
use crate::error::ConfigError;
use crate::ports::{ClassifiedPorts, pairs_for_principals, principals_for_pairs};
use crate::principal::Principal;
use crate::wire::{FlowMatch, FlowMod, FlowModCommand, Instruction, TableRef};
use std::collections::BTreeMap;

/// The reserved dispatch table; never allocated to any principal
pub const HEAD_TABLE_ID: u8 = 0;

/// Priority of head-table rules. Matches are disjoint per ingress port, so
/// the value itself is irrelevant.
pub const HEAD_RULE_PRIORITY: u16 = 10;

/// A contiguous run of physical table ids
///
/// Virtual table ids are offsets into the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableRange {
    pub first: u8,
    pub count: u8,
}

impl TableRange {
    /// Physical table id for a virtual table id, if allocated
    pub fn physical(&self, virtual_table: u8) -> Option<u8> {
        (virtual_table < self.count).then(|| self.first + virtual_table)
    }
}

/// Scheme-specific resources held by one principal
#[derive(Debug, Clone)]
pub enum Allocation {
    LogicalPort(LogicalPortAllocation),
    ChainedTable(ChainedTableAllocation),
}

impl Allocation {
    /// Number of virtual tables the principal sees
    pub fn table_count(&self) -> u8 {
        match self {
            Allocation::LogicalPort(a) => a.tables.count,
            Allocation::ChainedTable(a) => a.early.count,
        }
    }

    /// Physical table the head table dispatches this principal's traffic to
    pub fn first_table(&self) -> u8 {
        match self {
            Allocation::LogicalPort(a) => a.tables.first,
            Allocation::ChainedTable(a) => a.early.first,
        }
    }
}

/// Logical-port scheme resources
#[derive(Debug, Clone, Default)]
pub struct LogicalPortAllocation {
    pub tables: TableRange,
    /// Loopback half ingress to this principal, keyed by port number,
    /// valued by peer principal id
    pub ingress_ports: BTreeMap<u32, u32>,
    /// Matching egress halves towards each peer
    pub egress_ports: BTreeMap<u32, u32>,
}

/// Chained-table scheme resources
#[derive(Debug, Clone)]
pub struct ChainedTableAllocation {
    pub early: TableRange,
    pub late: TableRange,
    /// Virtual egress port number to the peer's first late table
    pub egress_ports: BTreeMap<u32, u8>,
}

/// Partitions the switch's tables, ports and buffers among the configured
/// principals
///
/// Principal ids are assigned from the record order of `principals`,
/// 0-based. Allocation is one-shot; the returned principals are immutable
/// for the rest of the run.
pub fn allocate(
    strategy: Strategy,
    principals: &[PrincipalConfig],
    classified: &ClassifiedPorts,
    num_tables: u8,
    num_buffers: u32,
) -> Result<Vec<Principal>, ConfigError> {
    if principals.is_empty() {
        return Err(ConfigError::NoPrincipals);
    }

    let allocations = match strategy {
        Strategy::LogicalPort => allocate_logical_port(principals, classified, num_tables)?,
        Strategy::ChainedTable => allocate_chained_table(principals, classified, num_tables)?,
    };

    let buffers_each = num_buffers / principals.len() as u32;
    Ok(principals
        .iter()
        .zip(allocations)
        .enumerate()
        .map(|(id, (config, allocation))| {
            Principal::new(id as u32, config, buffers_each, allocation)
        })
        .collect())
}

fn tables_per_principal(num_tables: u8, num_principals: usize) -> usize {
    // table 0 is reserved for the head table
    (num_tables as usize).saturating_sub(1) / num_principals
}

fn allocate_logical_port(
    principals: &[PrincipalConfig],
    classified: &ClassifiedPorts,
    num_tables: u8,
) -> Result<Vec<Allocation>, ConfigError> {
    let n = principals.len();
    let per_principal = tables_per_principal(num_tables, n);
    if per_principal == 0 {
        return Err(ConfigError::InsufficientTables {
            tables: num_tables,
            principals: n,
        });
    }

    let supported = principals_for_pairs(classified.pairs.len());
    if supported < n {
        return Err(ConfigError::InsufficientLoopbackPairs {
            supported,
            configured: n,
        });
    }
    debug_assert!(classified.pairs.len() >= pairs_for_principals(n));

    let mut allocations: Vec<LogicalPortAllocation> = (0..n)
        .map(|i| LogicalPortAllocation {
            tables: TableRange {
                first: (1 + i * per_principal) as u8,
                count: per_principal as u8,
            },
            ..Default::default()
        })
        .collect();

    // every unordered pair of principals gets one loopback pair: the `a`
    // half is ingress to the lower-id principal, the `b` half ingress to
    // the higher-id one
    let mut pair_index = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            let pair = classified.pairs[pair_index];
            pair_index += 1;

            allocations[i].ingress_ports.insert(pair.a, j as u32);
            allocations[i].egress_ports.insert(pair.b, j as u32);
            allocations[j].ingress_ports.insert(pair.b, i as u32);
            allocations[j].egress_ports.insert(pair.a, i as u32);
        }
    }

    Ok(allocations.into_iter().map(Allocation::LogicalPort).collect())
}

fn allocate_chained_table(
    principals: &[PrincipalConfig],
    classified: &ClassifiedPorts,
    num_tables: u8,
) -> Result<Vec<Allocation>, ConfigError> {
    let n = principals.len();
    let per_principal = tables_per_principal(num_tables, n);
    // each principal needs at least one early and one late table
    let half = per_principal / 2;
    if half == 0 {
        return Err(ConfigError::InsufficientTables {
            tables: num_tables,
            principals: n,
        });
    }

    let ranges: Vec<(TableRange, TableRange)> = (0..n)
        .map(|i| {
            let range_first = 1 + i * per_principal;
            (
                TableRange {
                    first: range_first as u8,
                    count: half as u8,
                },
                TableRange {
                    first: (range_first + half) as u8,
                    count: half as u8,
                },
            )
        })
        .collect();

    // virtual egress port numbers start just above the highest reported
    // physical port number; each principal numbers its peers in id order
    let first_virtual_port = classified.highest_port_number + 1;
    let allocations = (0..n)
        .map(|i| {
            let mut egress_ports = BTreeMap::new();
            let mut virtual_port = first_virtual_port;
            for (j, (_, late)) in ranges.iter().enumerate() {
                if j == i {
                    continue;
                }
                egress_ports.insert(virtual_port, late.first);
                virtual_port += 1;
            }
            Allocation::ChainedTable(ChainedTableAllocation {
                early: ranges[i].0,
                late: ranges[i].1,
                egress_ports,
            })
        })
        .collect();

    Ok(allocations)
}

/// Head-table rules dispatching a principal's ingress traffic
///
/// One rule per physical port (and, in the logical-port scheme, per ingress
/// logical port), each jumping to the principal's first table. The caller
/// is responsible for the barrier after all principals' rules are issued.
pub fn head_table_rules(principal: &Principal) -> Vec<FlowMod> {
    let first_table = principal.allocation.first_table();

    let mut ingress_ports: Vec<u32> = principal.physical_ports.iter().copied().collect();
    if let Allocation::LogicalPort(alloc) = &principal.allocation {
        ingress_ports.extend(alloc.ingress_ports.keys().copied());
    }

    ingress_ports
        .into_iter()
        .map(|port| FlowMod {
            table: TableRef::Table(HEAD_TABLE_ID),
            command: FlowModCommand::Add,
            priority: HEAD_RULE_PRIORITY,
            match_: FlowMatch {
                in_port: Some(port),
                fields: BTreeMap::new(),
            },
            instructions: vec![Instruction::GotoTable(first_table)],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::classify_ports;
    use crate::wire::PortDesc;

    fn desc(name: &str, number: u32) -> PortDesc {
        PortDesc {
            name: name.to_string(),
            number,
        }
    }

    fn three_principal_ports() -> ClassifiedPorts {
        classify_ports(&[
            desc("p0", 1),
            desc("p1", 2),
            desc("p2", 3),
            desc("loopback_0_a", 4),
            desc("loopback_0_b", 5),
            desc("loopback_1_a", 6),
            desc("loopback_1_b", 7),
            desc("loopback_2_a", 8),
            desc("loopback_2_b", 9),
        ])
        .unwrap()
    }

    fn three_principal_configs() -> Vec<PrincipalConfig> {
        (0..3u16)
            .map(|i| PrincipalConfig {
                physical_ports: vec![i as u32 + 1],
                listening_ip: "127.0.0.1".to_string(),
                listening_port: 7001 + i,
            })
            .collect()
    }

    #[test]
    fn test_logical_port_table_ranges() {
        let principals = allocate(
            Strategy::LogicalPort,
            &three_principal_configs(),
            &three_principal_ports(),
            10,
            300,
        )
        .unwrap();

        let expected = [(1u8, 3u8), (4, 3), (7, 3)];
        for (principal, (first, count)) in principals.iter().zip(expected) {
            match &principal.allocation {
                Allocation::LogicalPort(a) => {
                    assert_eq!(a.tables, TableRange { first, count });
                }
                _ => panic!("expected logical-port allocation"),
            }
            assert_eq!(principal.buffers, 100);
        }
    }

    #[test]
    fn test_logical_port_pair_assignment_is_symmetric() {
        let principals = allocate(
            Strategy::LogicalPort,
            &three_principal_configs(),
            &three_principal_ports(),
            10,
            300,
        )
        .unwrap();

        let alloc = |i: usize| match &principals[i].allocation {
            Allocation::LogicalPort(a) => a,
            _ => panic!("expected logical-port allocation"),
        };

        // (P0,P1) -> pair 0 (ports 4/5), (P0,P2) -> pair 1 (6/7),
        // (P1,P2) -> pair 2 (8/9)
        assert_eq!(alloc(0).ingress_ports[&4], 1);
        assert_eq!(alloc(0).egress_ports[&5], 1);
        assert_eq!(alloc(1).ingress_ports[&5], 0);
        assert_eq!(alloc(1).egress_ports[&4], 0);

        assert_eq!(alloc(0).ingress_ports[&6], 2);
        assert_eq!(alloc(2).ingress_ports[&7], 0);
        assert_eq!(alloc(1).ingress_ports[&8], 2);
        assert_eq!(alloc(2).ingress_ports[&9], 1);

        // a's egress half towards b is exactly b's ingress half from a
        for i in 0..3usize {
            for (&port, &peer) in &alloc(i).egress_ports {
                assert_eq!(alloc(peer as usize).ingress_ports[&port], i as u32);
            }
        }
    }

    #[test]
    fn test_logical_port_head_table_rule_count() {
        let principals = allocate(
            Strategy::LogicalPort,
            &three_principal_configs(),
            &three_principal_ports(),
            10,
            300,
        )
        .unwrap();

        // 3 physical ports + 6 ingress logical halves across principals
        let all_rules: Vec<FlowMod> = principals.iter().flat_map(head_table_rules).collect();
        assert_eq!(all_rules.len(), 9);

        for rule in &all_rules {
            assert_eq!(rule.table, TableRef::Table(HEAD_TABLE_ID));
            assert_eq!(rule.instructions.len(), 1);
        }

        // every rule jumps to the first table of some principal
        for rule in &all_rules {
            match rule.instructions[0] {
                Instruction::GotoTable(t) => assert!([1, 4, 7].contains(&t)),
                _ => panic!("head rule must be a goto"),
            }
        }
    }

    #[test]
    fn test_logical_port_insufficient_tables() {
        let result = allocate(
            Strategy::LogicalPort,
            &three_principal_configs(),
            &three_principal_ports(),
            3,
            300,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InsufficientTables {
                tables: 3,
                principals: 3
            })
        ));
    }

    #[test]
    fn test_logical_port_insufficient_pairs() {
        let classified = classify_ports(&[
            desc("p0", 1),
            desc("p1", 2),
            desc("p2", 3),
            desc("loopback_0_a", 4),
            desc("loopback_0_b", 5),
        ])
        .unwrap();

        let result = allocate(
            Strategy::LogicalPort,
            &three_principal_configs(),
            &classified,
            10,
            300,
        );
        assert_eq!(
            result.err(),
            Some(ConfigError::InsufficientLoopbackPairs {
                supported: 2,
                configured: 3
            })
        );
    }

    #[test]
    fn test_chained_table_ranges_and_virtual_ports() {
        let principals = allocate(
            Strategy::ChainedTable,
            &three_principal_configs(),
            &three_principal_ports(),
            10,
            300,
        )
        .unwrap();

        let alloc = |i: usize| match &principals[i].allocation {
            Allocation::ChainedTable(a) => a,
            _ => panic!("expected chained-table allocation"),
        };

        // 9 usable tables, 3 per principal, split 1 early / 1 late
        assert_eq!(alloc(0).early, TableRange { first: 1, count: 1 });
        assert_eq!(alloc(0).late, TableRange { first: 2, count: 1 });
        assert_eq!(alloc(1).early, TableRange { first: 4, count: 1 });
        assert_eq!(alloc(1).late, TableRange { first: 5, count: 1 });
        assert_eq!(alloc(2).early, TableRange { first: 7, count: 1 });
        assert_eq!(alloc(2).late, TableRange { first: 8, count: 1 });

        // virtual ports start above the highest reported port number (9)
        // and map to the peers' first late tables in id order
        assert_eq!(alloc(0).egress_ports[&10], 5);
        assert_eq!(alloc(0).egress_ports[&11], 8);
        assert_eq!(alloc(1).egress_ports[&10], 2);
        assert_eq!(alloc(1).egress_ports[&11], 8);
        assert_eq!(alloc(2).egress_ports[&10], 2);
        assert_eq!(alloc(2).egress_ports[&11], 5);
    }

    #[test]
    fn test_chained_table_head_rules_cover_physical_ports_only() {
        let principals = allocate(
            Strategy::ChainedTable,
            &three_principal_configs(),
            &three_principal_ports(),
            10,
            300,
        )
        .unwrap();

        let rules = head_table_rules(&principals[1]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].match_.in_port, Some(2));
        assert_eq!(rules[0].instructions, vec![Instruction::GotoTable(4)]);
    }

    #[test]
    fn test_chained_table_insufficient_tables() {
        // 3 principals need 2*3+1 = 7 tables minimum
        let result = allocate(
            Strategy::ChainedTable,
            &three_principal_configs(),
            &three_principal_ports(),
            5,
            300,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InsufficientTables { .. })
        ));
    }

    #[test]
    fn test_table_range_lookup() {
        let range = TableRange { first: 4, count: 3 };
        assert_eq!(range.physical(0), Some(4));
        assert_eq!(range.physical(2), Some(6));
        assert_eq!(range.physical(3), None);
    }
}
