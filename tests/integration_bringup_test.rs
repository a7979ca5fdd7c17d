// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Integration test: switch bring-up, head-table installation and the
//! barrier gate in front of the principal sessions

use futures::{SinkExt, StreamExt};
use pluribus::{
    ConfigError, ControlFrame, ControlMessage, FlowMod, HypervisorConfig, Instruction,
    PluribusError, PortDesc, PrincipalConfig, ProtocolError, Strategy, SwitchController, TableRef,
    WireErrorKind, frame_stream,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

fn desc(name: &str, number: u32) -> PortDesc {
    PortDesc {
        name: name.to_string(),
        number,
    }
}

/// Three physical ports and three loopback pairs: enough for three
/// principals under either strategy
fn switch_ports() -> Vec<PortDesc> {
    vec![
        desc("p0", 1),
        desc("p1", 2),
        desc("p2", 3),
        desc("loopback_0_a", 4),
        desc("loopback_0_b", 5),
        desc("loopback_1_a", 6),
        desc("loopback_1_b", 7),
        desc("loopback_2_a", 8),
        desc("loopback_2_b", 9),
    ]
}

fn config_for(listeners: &[&TcpListener], strategy: Strategy) -> HypervisorConfig {
    let principals = listeners
        .iter()
        .enumerate()
        .map(|(i, listener)| {
            let addr = listener.local_addr().unwrap();
            PrincipalConfig {
                physical_ports: vec![i as u32 + 1],
                listening_ip: addr.ip().to_string(),
                listening_port: addr.port(),
            }
        })
        .collect();
    HypervisorConfig {
        listen_address: "127.0.0.1:0".to_string(),
        strategy,
        port_discovery_delay: Duration::ZERO,
        principals,
    }
}

async fn reply(
    switch: &mut pluribus::ControlStream<tokio::io::DuplexStream>,
    xid: u32,
    message: ControlMessage,
) {
    switch.send(ControlFrame { xid, message }).await.unwrap();
}

#[tokio::test]
async fn test_bringup_installs_head_tables_then_opens_sessions() {
    let listener0 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&[&listener0, &listener1, &listener2], Strategy::LogicalPort);

    let (hypervisor_io, switch_io) = tokio::io::duplex(8192);
    let controller = SwitchController::new(config, hypervisor_io);
    tokio::spawn(controller.run());

    let mut switch = frame_stream(switch_io);

    // bring-up opens with a hello and a features request
    let hello = switch.next().await.unwrap().unwrap();
    assert!(matches!(hello.message, ControlMessage::Hello { .. }));
    let features_req = switch.next().await.unwrap().unwrap();
    assert!(matches!(
        features_req.message,
        ControlMessage::FeaturesRequest
    ));

    reply(
        &mut switch,
        features_req.xid,
        ControlMessage::FeaturesReply {
            datapath_id: 0x42,
            num_buffers: 300,
            num_tables: 10,
            auxiliary_id: 0,
            capabilities: 0,
        },
    )
    .await;

    let port_req = switch.next().await.unwrap().unwrap();
    assert!(matches!(
        port_req.message,
        ControlMessage::PortDescRequest
    ));
    reply(
        &mut switch,
        port_req.xid,
        ControlMessage::PortDescReply {
            ports: switch_ports(),
        },
    )
    .await;

    // 3 physical + 6 ingress loopback halves, then one barrier
    let mut head_rules: Vec<FlowMod> = Vec::new();
    let barrier_xid = loop {
        let frame = switch.next().await.unwrap().unwrap();
        match frame.message {
            ControlMessage::FlowMod(rule) => head_rules.push(rule),
            ControlMessage::BarrierRequest => break frame.xid,
            other => panic!("unexpected message during install: {:?}", other),
        }
    };
    assert_eq!(head_rules.len(), 9);
    for rule in &head_rules {
        assert_eq!(rule.table, TableRef::Table(0));
        assert!(matches!(rule.instructions[0], Instruction::GotoTable(_)));
    }

    // no principal session may open before the barrier is confirmed
    assert!(
        timeout(Duration::from_millis(100), listener0.accept())
            .await
            .is_err()
    );

    reply(&mut switch, barrier_xid, ControlMessage::BarrierReply).await;

    let (stream0, _) = listener0.accept().await.unwrap();
    let (stream1, _) = listener1.accept().await.unwrap();
    let (stream2, _) = listener2.accept().await.unwrap();
    let mut principal0 = frame_stream(stream0);
    let _principal1 = frame_stream(stream1);
    let _principal2 = frame_stream(stream2);

    let hello = principal0.next().await.unwrap().unwrap();
    assert!(matches!(hello.message, ControlMessage::Hello { .. }));

    // the principal sees only its own slice of the switch
    principal0
        .send(ControlFrame {
            xid: 21,
            message: ControlMessage::FeaturesRequest,
        })
        .await
        .unwrap();
    let features = principal0.next().await.unwrap().unwrap();
    assert_eq!(features.xid, 21);
    match features.message {
        ControlMessage::FeaturesReply {
            num_tables,
            num_buffers,
            datapath_id,
            ..
        } => {
            assert_eq!(num_tables, 3);
            assert_eq!(num_buffers, 100);
            assert_eq!(datapath_id, 0x42);
        }
        other => panic!("unexpected reply: {:?}", other),
    }

    // a valid flow mod is rewritten and lands at the physical switch
    principal0
        .send(ControlFrame {
            xid: 22,
            message: ControlMessage::FlowMod(FlowMod {
                table: TableRef::Table(0),
                command: pluribus::FlowModCommand::Add,
                priority: 50,
                match_: pluribus::FlowMatch {
                    in_port: Some(1),
                    fields: Default::default(),
                },
                instructions: vec![Instruction::GotoTable(1)],
            }),
        })
        .await
        .unwrap();
    let forwarded = switch.next().await.unwrap().unwrap();
    match forwarded.message {
        ControlMessage::FlowMod(rule) => {
            // principal 0 holds tables [1,4)
            assert_eq!(rule.table, TableRef::Table(1));
            assert_eq!(rule.instructions, vec![Instruction::GotoTable(2)]);
        }
        other => panic!("unexpected message at switch: {:?}", other),
    }

    // an invalid flow mod is bounced back and never reaches the switch
    principal0
        .send(ControlFrame {
            xid: 23,
            message: ControlMessage::FlowMod(FlowMod {
                table: TableRef::Table(5),
                command: pluribus::FlowModCommand::Add,
                priority: 50,
                match_: Default::default(),
                instructions: vec![],
            }),
        })
        .await
        .unwrap();
    let rejection = principal0.next().await.unwrap().unwrap();
    assert_eq!(rejection.xid, 23);
    match rejection.message {
        ControlMessage::ErrorMsg { kind, .. } => assert_eq!(kind, WireErrorKind::BadTableId),
        other => panic!("unexpected reply: {:?}", other),
    }
    assert!(
        timeout(Duration::from_millis(100), switch.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_bringup_fails_on_insufficient_loopback_pairs() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&[&listener, &listener, &listener], Strategy::LogicalPort);

    let (hypervisor_io, switch_io) = tokio::io::duplex(8192);
    let controller = SwitchController::new(config, hypervisor_io);
    let run = tokio::spawn(controller.run());

    let mut switch = frame_stream(switch_io);
    let _hello = switch.next().await.unwrap().unwrap();
    let features_req = switch.next().await.unwrap().unwrap();
    reply(
        &mut switch,
        features_req.xid,
        ControlMessage::FeaturesReply {
            datapath_id: 1,
            num_buffers: 300,
            num_tables: 10,
            auxiliary_id: 0,
            capabilities: 0,
        },
    )
    .await;

    let port_req = switch.next().await.unwrap().unwrap();
    // one pair supports two principals, not the three configured
    reply(
        &mut switch,
        port_req.xid,
        ControlMessage::PortDescReply {
            ports: vec![
                desc("p0", 1),
                desc("p1", 2),
                desc("p2", 3),
                desc("loopback_0_a", 4),
                desc("loopback_0_b", 5),
            ],
        },
    )
    .await;

    let result = run.await.unwrap();
    match result {
        Err(PluribusError::Config(ConfigError::InsufficientLoopbackPairs {
            supported,
            configured,
        })) => {
            assert_eq!(supported, 2);
            assert_eq!(configured, 3);
        }
        other => panic!("expected insufficient-pairs failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_switch_error_during_bringup_is_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&[&listener], Strategy::LogicalPort);

    let (hypervisor_io, switch_io) = tokio::io::duplex(8192);
    let controller = SwitchController::new(config, hypervisor_io);
    let run = tokio::spawn(controller.run());

    let mut switch = frame_stream(switch_io);
    let _hello = switch.next().await.unwrap().unwrap();
    let _features_req = switch.next().await.unwrap().unwrap();
    reply(
        &mut switch,
        1,
        ControlMessage::ErrorMsg {
            kind: WireErrorKind::Protocol,
            message: "table feature negotiation failed".to_string(),
        },
    )
    .await;

    let result = run.await.unwrap();
    assert!(matches!(
        result,
        Err(PluribusError::Protocol(ProtocolError::SwitchError(_)))
    ));
}

#[tokio::test]
async fn test_connection_closed_before_running_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(&[&listener], Strategy::LogicalPort);

    let (hypervisor_io, switch_io) = tokio::io::duplex(8192);
    let controller = SwitchController::new(config, hypervisor_io);
    let run = tokio::spawn(controller.run());

    let mut switch = frame_stream(switch_io);
    let _hello = switch.next().await.unwrap().unwrap();
    let _features_req = switch.next().await.unwrap().unwrap();
    drop(switch);

    let result = run.await.unwrap();
    assert!(matches!(
        result,
        Err(PluribusError::Protocol(ProtocolError::ConnectionClosed))
    ));
}
