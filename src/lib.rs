// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! The core library for the pluribus switch hypervisor.
//!
//! Pluribus multiplexes a single table-based programmable switch among
//! several principals. Each principal connects to what looks like its own
//! switch with a handful of tables and its own ports, while the hypervisor
//! translates all flow programming onto disjoint slices of the one
//! physical switch.

// Public module declarations
pub mod allocator;
pub mod config;
pub mod error;
pub mod ports;
pub mod principal;
pub mod session;
pub mod switch;
pub mod wire;

// Re-export commonly used types
pub use allocator::{
    Allocation, ChainedTableAllocation, HEAD_TABLE_ID, LogicalPortAllocation, TableRange,
    allocate, head_table_rules,
};
pub use config::{CliArgs, HypervisorConfig, PrincipalConfig, Strategy};
pub use error::{
    ConfigError, PluribusError, ProtocolError, SessionError, TranslationError, WireError,
};
pub use ports::{
    ClassifiedPorts, LoopbackPair, Port, PortKind, classify_ports, pairs_for_principals,
    principals_for_pairs,
};
pub use principal::Principal;
pub use session::PrincipalSession;
pub use switch::{SwitchController, SwitchHandle, SwitchState};
pub use wire::{
    ANY_PORT, CONTROLLER_PORT, Action, ControlCodec, ControlFrame, ControlMessage, ControlStream,
    FlowMatch, FlowMod, FlowModCommand, Instruction, PortDesc, TableRef, WIRE_VERSION,
    WireErrorKind, frame_stream,
};
