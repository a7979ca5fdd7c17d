// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Per-principal control sessions
//!
//! One session per configured principal, opened only after the head table
//! is confirmed installed. From the principal's point of view the session
//! endpoint is a switch: features and description requests are answered
//! locally from the principal's allocation, and only translated
//! flow-modification traffic ever reaches the physical switch.

use crate::error::SessionError;
use crate::principal::Principal;
use crate::switch::SwitchHandle;
use crate::wire::{
    ControlFrame, ControlMessage, ControlStream, WIRE_VERSION, WireErrorKind, frame_stream,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Control-session endpoint for one principal
pub struct PrincipalSession {
    principal: Arc<Principal>,
    switch: SwitchHandle,
    datapath_id: u64,
}

impl PrincipalSession {
    pub fn new(principal: Arc<Principal>, switch: SwitchHandle, datapath_id: u64) -> Self {
        Self {
            principal,
            switch,
            datapath_id,
        }
    }

    /// Connects to the principal's listening address and serves its
    /// session until the socket closes
    pub async fn run(self) -> Result<(), SessionError> {
        let addr = self.principal.address.clone();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| SessionError::ConnectFailed {
                addr: addr.clone(),
                source,
            })?;
        info!(principal = self.principal.id, %addr, "principal session connected");
        self.serve(frame_stream(stream)).await
    }

    /// Serves an already-framed principal connection
    pub async fn serve<T>(self, mut framed: ControlStream<T>) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        framed
            .send(ControlFrame {
                xid: 0,
                message: ControlMessage::Hello {
                    version: WIRE_VERSION,
                },
            })
            .await?;

        while let Some(frame) = framed.next().await {
            let frame = frame?;
            self.handle_frame(frame, &mut framed).await?;
        }

        info!(principal = self.principal.id, "principal session closed");
        Ok(())
    }

    async fn handle_frame<T>(
        &self,
        frame: ControlFrame,
        framed: &mut ControlStream<T>,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let principal = self.principal.id;
        match frame.message {
            ControlMessage::Hello { version } => {
                debug!(principal, version, "principal hello");
            }
            ControlMessage::FeaturesRequest => {
                debug!(principal, "answering features request");
                framed
                    .send(ControlFrame {
                        xid: frame.xid,
                        message: self.principal.features_reply(self.datapath_id),
                    })
                    .await?;
            }
            ControlMessage::DescStatsRequest => {
                debug!(principal, "answering description stats request");
                framed
                    .send(ControlFrame {
                        xid: frame.xid,
                        message: self.principal.desc_stats_reply(),
                    })
                    .await?;
            }
            ControlMessage::FlowMod(flow_mod) => {
                match self.principal.translate_flow_mod(&flow_mod) {
                    Ok(rules) => {
                        debug!(
                            principal,
                            physical_rules = rules.len(),
                            "forwarding translated flow mod"
                        );
                        for rule in rules {
                            self.switch.send(ControlMessage::FlowMod(rule)).await?;
                        }
                    }
                    Err(err) => {
                        warn!(principal, %err, "rejected flow mod");
                        framed
                            .send(ControlFrame {
                                xid: frame.xid,
                                message: ControlMessage::ErrorMsg {
                                    kind: WireErrorKind::from(&err),
                                    message: err.to_string(),
                                },
                            })
                            .await?;
                    }
                }
            }
            // barriers are answered locally: flow mods already reach the
            // physical session in submission order through one writer
            ControlMessage::BarrierRequest => {
                framed
                    .send(ControlFrame {
                        xid: frame.xid,
                        message: ControlMessage::BarrierReply,
                    })
                    .await?;
            }
            other => {
                warn!(principal, kind = other.kind_name(), "unsupported message");
                framed
                    .send(ControlFrame {
                        xid: frame.xid,
                        message: ControlMessage::ErrorMsg {
                            kind: WireErrorKind::Unsupported,
                            message: format!("unsupported message: {}", other.kind_name()),
                        },
                    })
                    .await?;
            }
        }
        Ok(())
    }
}
