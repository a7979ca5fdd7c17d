// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Error types for the pluribus hypervisor
//!
//! Every component reports failures through a typed error enum; the
//! top-level `PluribusError` aggregates them for the controller's run loop.
//! Per-rule translation failures are deliberately separate from fatal
//! configuration and protocol errors: a rejected flow mod only affects the
//! principal that sent it.

use thiserror::Error;

/// Main error type for hypervisor operations
#[derive(Error, Debug)]
pub enum PluribusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and bring-up errors
///
/// All of these are fatal: the controller must not reach the running state
/// if any of them occur.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFailed(String),

    #[error("Failed to parse config file: {0}")]
    ParseFailed(String),

    #[error("No principals configured")]
    NoPrincipals,

    #[error("Physical port {port} is assigned to more than one principal")]
    OverlappingPhysicalPorts { port: u32 },

    #[error("Loopback port pair {pair} is missing its partner half")]
    UnmatchedLoopback { pair: usize },

    #[error(
        "Not enough loopback port pairs: can only support {supported} principals, not {configured}"
    )]
    InsufficientLoopbackPairs { supported: usize, configured: usize },

    #[error("Insufficient number of tables ({tables}) to support {principals} principals")]
    InsufficientTables { tables: u8, principals: usize },
}

/// Per-rule translation rejections
///
/// Scoped to the single offending flow mod; the owning session replies to
/// the principal and keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("Write to virtual table {table} outside allocation of {allocated} tables")]
    InvalidTableWrite { table: u8, allocated: u8 },

    #[error("Goto target {table} outside allocation of {allocated} tables")]
    InvalidGoto { table: u8, allocated: u8 },

    #[error("Output to port {port} that the principal does not own")]
    InvalidOutput { port: u32 },

    #[error("Ingress match on port {port} that is neither physical nor virtual")]
    InvalidIngressMatch { port: u32 },

    #[error("Flow mods addressed to the all-tables wildcard are not supported")]
    AllTablesUnsupported,
}

/// Protocol errors on the physical switch session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Switch reported error during bring-up: {0}")]
    SwitchError(String),

    #[error("Invalid state transition: expected {expected}, got {actual}")]
    InvalidTransition { expected: String, actual: String },

    #[error("Unexpected message during bring-up: {0}")]
    UnexpectedMessage(String),

    #[error("Physical switch connection closed")]
    ConnectionClosed,
}

/// Principal session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to connect to principal at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        source: std::io::Error,
    },

    #[error("Principal connection closed")]
    ConnectionClosed,

    #[error("Switch writer channel closed")]
    WriterGone,

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
}

/// Framing and serialization errors on a control connection
#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Postcard serialization failed: {0}")]
    Postcard(#[from] postcard::Error),
}
