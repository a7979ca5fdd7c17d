// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Typed control-message model and framed codec
//!
//! The hypervisor core only ever manipulates the typed model below; byte
//! layout is the codec's concern. Frames are length-delimited and bodies
//! are postcard-encoded, so both the physical switch session and every
//! principal session speak the same framing.

use crate::error::{TranslationError, WireError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::codec::{Decoder, Encoder, Framed, LengthDelimitedCodec};

/// Protocol revision carried in hello messages
pub const WIRE_VERSION: u8 = 4;

/// Ingress wildcard: a match on this port constrains nothing
pub const ANY_PORT: u32 = 0xffff_ffff;

/// Reserved output port that punts the packet to the controller
pub const CONTROLLER_PORT: u32 = 0xffff_fffd;

/// A control message together with its transaction id
///
/// Replies carry the xid of the request they answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    pub xid: u32,
    pub message: ControlMessage,
}

/// Control-channel messages exchanged with switches and principals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    Hello {
        version: u8,
    },
    FeaturesRequest,
    FeaturesReply {
        datapath_id: u64,
        num_buffers: u32,
        num_tables: u8,
        auxiliary_id: u8,
        capabilities: u32,
    },
    PortDescRequest,
    PortDescReply {
        ports: Vec<PortDesc>,
    },
    DescStatsRequest,
    DescStatsReply {
        manufacturer: String,
        hardware: String,
        software: String,
        serial: String,
        datapath: String,
    },
    FlowMod(FlowMod),
    BarrierRequest,
    BarrierReply,
    ErrorMsg {
        kind: WireErrorKind,
        message: String,
    },
}

impl ControlMessage {
    /// Short name used in logs and protocol errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            ControlMessage::Hello { .. } => "hello",
            ControlMessage::FeaturesRequest => "features-request",
            ControlMessage::FeaturesReply { .. } => "features-reply",
            ControlMessage::PortDescRequest => "port-desc-request",
            ControlMessage::PortDescReply { .. } => "port-desc-reply",
            ControlMessage::DescStatsRequest => "desc-stats-request",
            ControlMessage::DescStatsReply { .. } => "desc-stats-reply",
            ControlMessage::FlowMod(_) => "flow-mod",
            ControlMessage::BarrierRequest => "barrier-request",
            ControlMessage::BarrierReply => "barrier-reply",
            ControlMessage::ErrorMsg { .. } => "error",
        }
    }
}

/// One port as reported by the switch's port description reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDesc {
    pub name: String,
    pub number: u32,
}

/// Error categories reported back to a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireErrorKind {
    BadTableId,
    BadGotoTable,
    BadOutputPort,
    BadIngressPort,
    Unsupported,
    Protocol,
}

impl From<&TranslationError> for WireErrorKind {
    fn from(err: &TranslationError) -> Self {
        match err {
            TranslationError::InvalidTableWrite { .. } => WireErrorKind::BadTableId,
            TranslationError::InvalidGoto { .. } => WireErrorKind::BadGotoTable,
            TranslationError::InvalidOutput { .. } => WireErrorKind::BadOutputPort,
            TranslationError::InvalidIngressMatch { .. } => WireErrorKind::BadIngressPort,
            TranslationError::AllTablesUnsupported => WireErrorKind::Unsupported,
        }
    }
}

/// Target table of a flow mod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableRef {
    /// A single table id (virtual on the principal side, physical on the
    /// switch side)
    Table(u8),
    /// The all-tables wildcard
    All,
}

/// Flow mod commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowModCommand {
    Add,
    Modify,
    Delete,
}

/// Match portion of a flow rule
///
/// The ingress-port constraint is pulled out of the generic field map
/// because translation treats it specially.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowMatch {
    pub in_port: Option<u32>,
    pub fields: BTreeMap<String, u64>,
}

impl FlowMatch {
    /// True when the match does not constrain the ingress port
    pub fn matches_any_port(&self) -> bool {
        match self.in_port {
            None => true,
            Some(port) => port == ANY_PORT,
        }
    }
}

/// Ordered flow-rule instructions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    GotoTable(u8),
    ApplyActions(Vec<Action>),
}

/// Actions inside an apply-actions instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Output(u32),
    SetField { field: String, value: u64 },
}

/// A flow-programming request
///
/// On the principal side table ids and ports are virtual; translation
/// rewrites them into physical ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMod {
    pub table: TableRef,
    pub command: FlowModCommand,
    pub priority: u16,
    pub match_: FlowMatch,
    pub instructions: Vec<Instruction>,
}

/// Length-delimited postcard codec for control frames
pub struct ControlCodec {
    inner: LengthDelimitedCodec,
}

impl ControlCodec {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::new(),
        }
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControlCodec {
    type Item = ControlFrame;
    type Error = WireError;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<ControlFrame>, WireError> {
        match self.inner.decode(src)? {
            Some(body) => Ok(Some(postcard::from_bytes(&body)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<ControlFrame> for ControlCodec {
    type Error = WireError;

    fn encode(&mut self, frame: ControlFrame, dst: &mut bytes::BytesMut) -> Result<(), WireError> {
        let body = postcard::to_allocvec(&frame)?;
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

/// A control connection framed with [`ControlCodec`]
pub type ControlStream<T> = Framed<T, ControlCodec>;

/// Wraps a raw byte stream into a framed control connection
pub fn frame_stream<T>(io: T) -> ControlStream<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite,
{
    Framed::new(io, ControlCodec::new())
}
