// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Principals and the flow-mod rewrite pipeline
//!
//! A principal is a logical controller granted an isolated slice of the
//! physical switch. Every control message it sends is validated and
//! rewritten here: virtual table ids become physical ones, goto targets are
//! bounds-checked, and output ports are checked against the ports the
//! principal actually owns. Translation never raises; it returns an
//! explicit result so the owning session can reply to the principal on
//! failure.

use crate::allocator::{Allocation, ChainedTableAllocation, LogicalPortAllocation, TableRange};
use crate::config::PrincipalConfig;
use crate::error::TranslationError;
use crate::wire::{
    ANY_PORT, Action, CONTROLLER_PORT, ControlMessage, FlowMod, Instruction, TableRef,
};
use std::collections::BTreeSet;

/// Capabilities advertised in synthesized features replies:
/// flow, table, port and queue statistics.
const CAPABILITIES: u32 = 71;

/// One tenant of the physical switch
///
/// Constructed fully initialized by the allocator during bring-up and
/// shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Assigned from config record order, 0-based
    pub id: u32,
    /// Port numbers this principal physically controls
    pub physical_ports: BTreeSet<u32>,
    /// Address the principal listens on for its control session
    pub address: String,
    /// This principal's share of the switch's packet buffers
    pub buffers: u32,
    /// Scheme-specific table and port resources
    pub allocation: Allocation,
}

impl Principal {
    pub fn new(id: u32, config: &PrincipalConfig, buffers: u32, allocation: Allocation) -> Self {
        Self {
            id,
            physical_ports: config.physical_ports.iter().copied().collect(),
            address: config.address(),
            buffers,
            allocation,
        }
    }

    /// Number of virtual tables the principal may address
    pub fn allocated_table_count(&self) -> u8 {
        self.allocation.table_count()
    }

    /// Synthesized features reply
    ///
    /// Reports only the principal's allocated table count and buffer share,
    /// never the physical switch's real counts.
    pub fn features_reply(&self, datapath_id: u64) -> ControlMessage {
        ControlMessage::FeaturesReply {
            datapath_id,
            num_buffers: self.buffers,
            num_tables: self.allocated_table_count(),
            auxiliary_id: 0,
            capabilities: CAPABILITIES,
        }
    }

    /// Synthesized, static description payload
    pub fn desc_stats_reply(&self) -> ControlMessage {
        ControlMessage::DescStatsReply {
            manufacturer: "Pluribus Contributors".to_string(),
            hardware: "virtual switch slice".to_string(),
            software: env!("CARGO_PKG_VERSION").to_string(),
            serial: format!("principal-{}", self.id),
            datapath: format!("shared datapath, slice {}", self.id),
        }
    }

    /// Rewrites one virtualized flow mod into its physical form
    ///
    /// Produces one physical rule in the logical-port scheme and one or two
    /// in the chained-table scheme. Any rejection produces zero rules.
    pub fn translate_flow_mod(&self, flow_mod: &FlowMod) -> Result<Vec<FlowMod>, TranslationError> {
        match &self.allocation {
            Allocation::LogicalPort(alloc) => self.translate_logical(alloc, flow_mod),
            Allocation::ChainedTable(alloc) => self.translate_chained(alloc, flow_mod),
        }
    }

    fn translate_logical(
        &self,
        alloc: &LogicalPortAllocation,
        flow_mod: &FlowMod,
    ) -> Result<Vec<FlowMod>, TranslationError> {
        let virtual_table = resolve_virtual_table(flow_mod.table, alloc.tables.count)?;
        let physical_table =
            alloc
                .tables
                .physical(virtual_table)
                .ok_or(TranslationError::InvalidTableWrite {
                    table: virtual_table,
                    allocated: alloc.tables.count,
                })?;

        let instructions = flow_mod
            .instructions
            .iter()
            .map(|instruction| match instruction {
                Instruction::GotoTable(target) => {
                    let physical = alloc.tables.physical(*target).ok_or(
                        TranslationError::InvalidGoto {
                            table: *target,
                            allocated: alloc.tables.count,
                        },
                    )?;
                    Ok(Instruction::GotoTable(physical))
                }
                Instruction::ApplyActions(actions) => {
                    for action in actions {
                        if let Action::Output(port) = action {
                            let owned = self.physical_ports.contains(port)
                                || alloc.egress_ports.contains_key(port);
                            if !owned {
                                return Err(TranslationError::InvalidOutput { port: *port });
                            }
                        }
                    }
                    Ok(Instruction::ApplyActions(actions.clone()))
                }
            })
            .collect::<Result<Vec<_>, TranslationError>>()?;

        let mut out = flow_mod.clone();
        out.table = TableRef::Table(physical_table);
        out.instructions = instructions;
        Ok(vec![out])
    }

    fn translate_chained(
        &self,
        alloc: &ChainedTableAllocation,
        flow_mod: &FlowMod,
    ) -> Result<Vec<FlowMod>, TranslationError> {
        let virtual_table = resolve_virtual_table(flow_mod.table, alloc.early.count)?;

        match flow_mod.match_.in_port {
            None | Some(ANY_PORT) => {
                // head of chain: the packet may enter at either stage, so
                // the rule is installed in both the early and late table
                let early =
                    self.rewrite_for_stage(alloc, flow_mod, virtual_table, Stage::Early, false)?;
                let late =
                    self.rewrite_for_stage(alloc, flow_mod, virtual_table, Stage::Late, true)?;
                Ok(vec![early, late])
            }
            Some(in_port) if self.physical_ports.contains(&in_port) => {
                let early =
                    self.rewrite_for_stage(alloc, flow_mod, virtual_table, Stage::Early, false)?;
                Ok(vec![early])
            }
            Some(in_port) if alloc.egress_ports.contains_key(&in_port) => {
                // the packet reaches the late table via a goto, so the
                // virtual port constraint cannot match there; strip it
                let late =
                    self.rewrite_for_stage(alloc, flow_mod, virtual_table, Stage::Late, true)?;
                Ok(vec![late])
            }
            Some(in_port) => Err(TranslationError::InvalidIngressMatch { port: in_port }),
        }
    }

    fn rewrite_for_stage(
        &self,
        alloc: &ChainedTableAllocation,
        flow_mod: &FlowMod,
        virtual_table: u8,
        stage: Stage,
        strip_in_port: bool,
    ) -> Result<FlowMod, TranslationError> {
        let range = match stage {
            Stage::Early => &alloc.early,
            Stage::Late => &alloc.late,
        };
        let physical_table =
            range
                .physical(virtual_table)
                .ok_or(TranslationError::InvalidTableWrite {
                    table: virtual_table,
                    allocated: range.count,
                })?;

        let mut instructions = Vec::with_capacity(flow_mod.instructions.len());
        let mut chain_goto: Option<u8> = None;
        for instruction in &flow_mod.instructions {
            match instruction {
                Instruction::GotoTable(target) => {
                    let physical =
                        range
                            .physical(*target)
                            .ok_or(TranslationError::InvalidGoto {
                                table: *target,
                                allocated: range.count,
                            })?;
                    instructions.push(Instruction::GotoTable(physical));
                }
                Instruction::ApplyActions(actions) => {
                    let mut kept = Vec::with_capacity(actions.len());
                    for action in actions {
                        match action {
                            Action::Output(port) if self.physical_ports.contains(port) => {
                                kept.push(action.clone());
                            }
                            Action::Output(port) => {
                                let peer_late = alloc.egress_ports.get(port).copied().ok_or(
                                    TranslationError::InvalidOutput { port: *port },
                                )?;
                                match stage {
                                    // forwarding to a peer is a jump into
                                    // its late table
                                    Stage::Early => chain_goto = Some(peer_late),
                                    // a packet already past its late table
                                    // has no further table to traverse
                                    Stage::Late => kept.push(Action::Output(CONTROLLER_PORT)),
                                }
                            }
                            other => kept.push(other.clone()),
                        }
                    }
                    if !kept.is_empty() {
                        instructions.push(Instruction::ApplyActions(kept));
                    }
                }
            }
        }
        if let Some(target) = chain_goto {
            instructions.push(Instruction::GotoTable(target));
        }

        let mut out = flow_mod.clone();
        out.table = TableRef::Table(physical_table);
        if strip_in_port {
            out.match_.in_port = None;
        }
        out.instructions = instructions;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Early,
    Late,
}

fn resolve_virtual_table(table: TableRef, allocated: u8) -> Result<u8, TranslationError> {
    match table {
        TableRef::All => Err(TranslationError::AllTablesUnsupported),
        TableRef::Table(t) if t >= allocated => Err(TranslationError::InvalidTableWrite {
            table: t,
            allocated,
        }),
        TableRef::Table(t) => Ok(t),
    }
}
