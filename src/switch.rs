// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Switch controller and bring-up state machine
//!
//! Owns the single physical-switch session. Bring-up is strictly ordered:
//! features reply (table and buffer counts), port description reply (port
//! classification and resource allocation), head-table installation, then
//! a barrier. Only the matching barrier reply moves the controller to
//! `Running` and opens the principal sessions, so no principal can race
//! the dispatch table's construction.
//!
//! All writes to the physical session funnel through one writer task;
//! every producer holds a cloned [`SwitchHandle`].

use crate::allocator::{allocate, head_table_rules};
use crate::config::HypervisorConfig;
use crate::error::{PluribusError, ProtocolError, SessionError};
use crate::ports::{classify_ports, principals_for_pairs};
use crate::principal::Principal;
use crate::session::PrincipalSession;
use crate::wire::{
    ControlFrame, ControlMessage, ControlStream, PortDesc, WIRE_VERSION, frame_stream,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Bring-up state of the physical switch session
///
/// Transitions are monotonic; there is no rollback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Uninitialized,
    InstallingHeadTables,
    Running,
}

impl std::fmt::Display for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchState::Uninitialized => write!(f, "uninitialized"),
            SwitchState::InstallingHeadTables => write!(f, "installing-head-tables"),
            SwitchState::Running => write!(f, "running"),
        }
    }
}

impl SwitchState {
    /// Compare-and-advance: moves to `to` only from the expected state
    pub fn transition(&mut self, from: SwitchState, to: SwitchState) -> Result<(), ProtocolError> {
        if *self != from {
            return Err(ProtocolError::InvalidTransition {
                expected: from.to_string(),
                actual: self.to_string(),
            });
        }
        *self = to;
        Ok(())
    }
}

/// Cloneable handle funneling messages into the physical session's writer
///
/// Allocates a fresh transaction id per message from a shared counter.
#[derive(Clone)]
pub struct SwitchHandle {
    tx: mpsc::Sender<ControlFrame>,
    next_xid: Arc<AtomicU32>,
}

impl SwitchHandle {
    pub fn new(tx: mpsc::Sender<ControlFrame>) -> Self {
        Self {
            tx,
            next_xid: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Enqueues a message for the physical session and returns the
    /// transaction id it was sent with
    pub async fn send(&self, message: ControlMessage) -> Result<u32, SessionError> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(ControlFrame { xid, message })
            .await
            .map_err(|_| SessionError::WriterGone)?;
        Ok(xid)
    }
}

/// Spawns the single-writer task that owns the physical session's sink
pub fn spawn_switch_writer<T>(mut sink: SplitSink<ControlStream<T>, ControlFrame>) -> SwitchHandle
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ControlFrame>(64);
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = sink.send(frame).await {
                error!(%err, "physical session write failed");
                break;
            }
        }
    });
    SwitchHandle::new(tx)
}

/// The hypervisor's controller for the one physical switch
pub struct SwitchController<T> {
    config: HypervisorConfig,
    state: SwitchState,
    handle: SwitchHandle,
    reader: SplitStream<ControlStream<T>>,
    datapath_id: u64,
    num_tables: Option<u8>,
    num_buffers: Option<u32>,
    barrier_xid: Option<u32>,
    principals: Vec<Arc<Principal>>,
}

impl<T> SwitchController<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an established physical switch connection
    pub fn new(config: HypervisorConfig, io: T) -> Self {
        let (sink, reader) = frame_stream(io).split();
        let handle = spawn_switch_writer(sink);
        Self {
            config,
            state: SwitchState::Uninitialized,
            handle,
            reader,
            datapath_id: 0,
            num_tables: None,
            num_buffers: None,
            barrier_xid: None,
            principals: Vec::new(),
        }
    }

    /// Handle for forwarding translated traffic into the physical session
    pub fn switch_handle(&self) -> SwitchHandle {
        self.handle.clone()
    }

    /// Drives the session until the socket closes or bring-up fails
    pub async fn run(mut self) -> Result<(), PluribusError> {
        self.handle
            .send(ControlMessage::Hello {
                version: WIRE_VERSION,
            })
            .await?;
        self.handle.send(ControlMessage::FeaturesRequest).await?;

        while let Some(frame) = self.reader.next().await {
            self.handle_frame(frame?).await?;
        }

        if self.state == SwitchState::Running {
            info!("physical switch connection closed");
            Ok(())
        } else {
            Err(ProtocolError::ConnectionClosed.into())
        }
    }

    async fn handle_frame(&mut self, frame: ControlFrame) -> Result<(), PluribusError> {
        match frame.message {
            ControlMessage::Hello { version } => {
                debug!(version, "switch hello");
            }
            ControlMessage::FeaturesReply {
                datapath_id,
                num_buffers,
                num_tables,
                ..
            } => {
                if self.state != SwitchState::Uninitialized {
                    warn!("duplicate features reply ignored");
                    return Ok(());
                }
                info!(datapath_id, num_tables, num_buffers, "switch features");
                self.datapath_id = datapath_id;
                self.num_tables = Some(num_tables);
                self.num_buffers = Some(num_buffers);

                // give the switch time to finish creating loopback ports
                // before discovering them
                tokio::time::sleep(self.config.port_discovery_delay).await;
                self.handle.send(ControlMessage::PortDescRequest).await?;
            }
            ControlMessage::PortDescReply { ports } => {
                if self.state != SwitchState::Uninitialized {
                    warn!("duplicate port description reply ignored");
                    return Ok(());
                }
                self.install_head_tables(&ports).await?;
            }
            ControlMessage::BarrierReply => {
                if self.state == SwitchState::InstallingHeadTables
                    && self.barrier_xid == Some(frame.xid)
                {
                    self.enter_running()?;
                } else {
                    debug!(xid = frame.xid, "barrier reply");
                }
            }
            ControlMessage::ErrorMsg { kind, message } => {
                if self.state == SwitchState::Running {
                    // known gap: the triggering session is left open; there
                    // is no automatic teardown or remediation
                    error!(?kind, message, "switch reported error");
                } else {
                    return Err(ProtocolError::SwitchError(message).into());
                }
            }
            other => {
                if self.state == SwitchState::Running {
                    warn!(kind = other.kind_name(), "unexpected message ignored");
                } else {
                    return Err(
                        ProtocolError::UnexpectedMessage(other.kind_name().to_string()).into(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Classifies ports, partitions resources, and issues every head-table
    /// rule followed by one barrier
    async fn install_head_tables(&mut self, ports: &[PortDesc]) -> Result<(), PluribusError> {
        self.state.transition(
            SwitchState::Uninitialized,
            SwitchState::InstallingHeadTables,
        )?;
        info!("transitioning from uninitialized (allocating resources, installing head table)");

        let num_tables = self
            .num_tables
            .ok_or_else(|| ProtocolError::UnexpectedMessage("ports before features".to_string()))?;
        let num_buffers = self.num_buffers.unwrap_or(0);

        let classified = classify_ports(ports)?;
        info!(
            total_ports = classified.ports.len(),
            loopback_pairs = classified.pairs.len(),
            supportable_principals = principals_for_pairs(classified.pairs.len()),
            "classified switch ports"
        );

        let principals = allocate(
            self.config.strategy,
            &self.config.principals,
            &classified,
            num_tables,
            num_buffers,
        )?;

        for principal in &principals {
            for rule in head_table_rules(principal) {
                self.handle.send(ControlMessage::FlowMod(rule)).await?;
            }
        }
        // confirm every head-table rule before any principal can connect
        let barrier_xid = self.handle.send(ControlMessage::BarrierRequest).await?;
        self.barrier_xid = Some(barrier_xid);
        self.principals = principals.into_iter().map(Arc::new).collect();
        Ok(())
    }

    /// Barrier confirmed: open every principal session
    fn enter_running(&mut self) -> Result<(), PluribusError> {
        self.state
            .transition(SwitchState::InstallingHeadTables, SwitchState::Running)?;
        info!(
            principals = self.principals.len(),
            "head tables installed, opening principal sessions"
        );

        for principal in &self.principals {
            let session =
                PrincipalSession::new(principal.clone(), self.handle.clone(), self.datapath_id);
            let id = principal.id;
            tokio::spawn(async move {
                if let Err(err) = session.run().await {
                    warn!(principal = id, %err, "principal session ended with error");
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_from_expected_state() {
        let mut state = SwitchState::Uninitialized;
        state
            .transition(
                SwitchState::Uninitialized,
                SwitchState::InstallingHeadTables,
            )
            .unwrap();
        assert_eq!(state, SwitchState::InstallingHeadTables);
    }

    #[test]
    fn test_transition_from_wrong_state_is_rejected() {
        let mut state = SwitchState::Running;
        let err = state
            .transition(
                SwitchState::Uninitialized,
                SwitchState::InstallingHeadTables,
            )
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidTransition {
                expected: "uninitialized".to_string(),
                actual: "running".to_string(),
            }
        );
        // state is untouched on a rejected transition
        assert_eq!(state, SwitchState::Running);
    }

    #[tokio::test]
    async fn test_switch_handle_allocates_distinct_xids() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = SwitchHandle::new(tx);

        let first = handle.send(ControlMessage::BarrierRequest).await.unwrap();
        let second = handle.send(ControlMessage::FeaturesRequest).await.unwrap();
        assert_ne!(first, second);

        assert_eq!(rx.recv().await.unwrap().xid, first);
        assert_eq!(rx.recv().await.unwrap().xid, second);
    }
}
