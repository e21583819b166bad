//! Session tests (atem-client)
//!
//! Drives the client against a scripted switcher over loopback UDP:
//! - Handshake, boot snapshot, and buffered boot events
//! - ACK discipline, duplicates, and gap recovery
//! - Retransmission and resend-as-ack
//! - Event coalescing
//! - Liveness timeout and reconnection
//! - Send-path and lock-budget errors

use atem_client::{Atem, ClientError, ConnectionState};
use atem_core::{Command, PacketFlags, Source, StateEvent};
use atem_test_utils::{
    aux_payload, boot_commands, preview_payload, program_payload, wait_for, EventCollector,
    ScriptedSwitcher, DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT,
};
use std::time::Duration;

/// Accept the handshake, feed the standard boot snapshot, and activate
async fn activate(switcher: &ScriptedSwitcher, client: &Atem) {
    switcher.accept_handshake().await;

    let boot_id = switcher.send_commands(&boot_commands(2, 3)).await;
    switcher.expect_ack(boot_id).await.expect("boot packet ack");

    let done_id = switcher.finish_handshake().await;
    switcher.expect_ack(done_id).await.expect("handshake ack");

    assert!(
        wait_for(|| client.connected(), DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT).await,
        "client did not reach ACTIVE"
    );
}

// ============================================================================
// Handshake and boot events
// ============================================================================

#[tokio::test]
async fn test_handshake_reaches_active() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");

    assert!(!client.connected());
    activate(&switcher, &client).await;
    assert_eq!(client.connection_state(), ConnectionState::Active);

    let state = client.state().expect("state lock");
    assert_eq!(state.product_id(), Some("Test Atem"));
    assert_eq!(state.topology().unwrap().mix_effects, 2);
    assert_eq!(state.topology().unwrap().aux_outputs, 3);
}

#[tokio::test]
async fn test_boot_events_buffered_until_active() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");

    let collector = EventCollector::new();
    client.on_event(collector.callback());

    switcher.accept_handshake().await;
    let boot_id = switcher.send_commands(&boot_commands(1, 1)).await;
    switcher.expect_ack(boot_id).await.expect("boot packet ack");

    // Still initializing: nothing may be delivered yet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(collector.count(), 0, "events leaked before ACTIVE");

    switcher.finish_handshake().await;

    assert!(
        collector
            .wait_for_event(StateEvent::Topology, DEFAULT_TIMEOUT)
            .await,
        "buffered topology event not flushed"
    );
    assert!(collector.has_event(StateEvent::ProductId));
    assert!(collector.has_event(StateEvent::ProtocolVersion));
    // En-masse flush delivers each category once.
    assert_eq!(collector.count_of(StateEvent::Topology), 1);
    assert_eq!(collector.count_of(StateEvent::ProductId), 1);
}

#[tokio::test]
async fn test_empty_frames_after_active_are_acked() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    for _ in 0..3 {
        let id = switcher.send_commands(&[]).await;
        let ack = switcher.expect_ack(id).await.expect("keep-alive ack");
        assert!(!ack.flags.contains(PacketFlags::RESEND_REQUEST));
    }
    assert!(client.connected());
}

#[tokio::test]
async fn test_size_in_bytes_reflects_topology() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");

    let empty = client.size_in_bytes().expect("size");
    activate(&switcher, &client).await;
    let populated = client.size_in_bytes().expect("size");
    assert!(populated > empty, "footprint did not grow with topology");
}

// ============================================================================
// ACK discipline, duplicates, ordering
// ============================================================================

#[tokio::test]
async fn test_duplicate_packet_acked_but_not_reprocessed() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    switcher
        .send_commands_with_id(1, &[(b"PrgI", program_payload(0, 5))])
        .await;
    switcher.expect_ack(1).await.expect("first ack");

    // Same id again with different content: must be acked again, but the
    // commands must not be re-applied.
    switcher
        .send_commands_with_id(1, &[(b"PrgI", program_payload(0, 7))])
        .await;
    switcher.expect_ack(1).await.expect("duplicate ack");

    let state = client.state().expect("state lock");
    assert_eq!(state.program_input(0), Some(Source(5)));
}

#[tokio::test]
async fn test_late_arrival_respects_slot_order() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    // Packet 2 first, then the straggler 1: both are fresh to the
    // sequence window, but the slot keeps the newer write.
    switcher
        .send_commands_with_id(2, &[(b"PrgI", program_payload(0, 5))])
        .await;
    switcher.expect_ack(2).await.expect("ack 2");

    switcher
        .send_commands_with_id(1, &[(b"PrgI", program_payload(0, 7))])
        .await;
    switcher.expect_ack(1).await.expect("ack 1");

    let state = client.state().expect("state lock");
    assert_eq!(state.program_input(0), Some(Source(5)));
}

#[tokio::test]
async fn test_gap_emits_resend_request() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    switcher
        .send_commands_with_id(1, &[(b"PrgI", program_payload(0, 4))])
        .await;
    let ack = switcher.expect_ack(1).await.expect("ack 1");
    assert!(!ack.flags.contains(PacketFlags::RESEND_REQUEST));

    // Skip id 2.
    switcher
        .send_commands_with_id(3, &[(b"PrgI", program_payload(0, 6))])
        .await;
    let ack = switcher.expect_ack(3).await.expect("ack 3");
    assert!(ack.flags.contains(PacketFlags::RESEND_REQUEST));
    assert_eq!(ack.resend_id, 2);
    assert_eq!(ack.unknown, 0x0100);

    // Deliver the missing packet; the next ack is clean again.
    switcher
        .send_commands_with_id(2, &[(b"PrvI", preview_payload(0, 9))])
        .await;
    switcher.expect_ack(2).await.expect("ack 2");

    switcher.send_commands_with_id(4, &[]).await;
    let ack = switcher.expect_ack(4).await.expect("clean ack");
    assert!(!ack.flags.contains(PacketFlags::RESEND_REQUEST));

    let state = client.state().expect("state lock");
    assert_eq!(state.program_input(0), Some(Source(6)));
    assert_eq!(state.preview_input(0), Some(Source(9)));
}

#[tokio::test]
async fn test_wrong_session_discarded_after_active() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    switcher
        .send_commands_with_id(1, &[(b"PrgI", program_payload(0, 5))])
        .await;
    switcher.expect_ack(1).await.expect("ack 1");

    // Hand-build a packet with a foreign session id.
    let mut body = Vec::new();
    body.extend_from_slice(&12u16.to_be_bytes());
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(b"PrgI");
    body.extend_from_slice(&program_payload(0, 7));
    let mut packet = atem_core::Packet::from_body(PacketFlags::ACK_REQUEST, 0x4242, &body)
        .expect("test packet");
    packet.set_packet_id(2);
    switcher.send_packet(&packet).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let state = client.state().expect("state lock");
    assert_eq!(state.program_input(0), Some(Source(5)));
}

// ============================================================================
// Retransmission
// ============================================================================

#[tokio::test]
async fn test_send_commands_and_retransmit() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    client
        .send_commands(vec![Command::Preview {
            me: 0,
            source: Source::input(2),
        }])
        .expect("send");

    let sent = switcher
        .expect_frame(DEFAULT_TIMEOUT, |f| f.has_command(b"CPvI"))
        .await
        .expect("command packet");
    assert_eq!(sent.packet_id, 1, "first batch must take local id 1");
    assert!(sent.flags.contains(PacketFlags::ACK_REQUEST));
    assert_eq!(sent.session_id, switcher.session_id());

    // Unacked: a resend request must reproduce the packet verbatim.
    switcher.request_resend(1).await;
    let resent = switcher
        .expect_frame(DEFAULT_TIMEOUT, |f| f.has_command(b"CPvI"))
        .await
        .expect("retransmission");
    assert_eq!(resent.packet_id, 1);

    // A second batch consumes the next id.
    client
        .send_commands(vec![Command::Cut { me: 0 }])
        .expect("send");
    let second = switcher
        .expect_frame(DEFAULT_TIMEOUT, |f| f.has_command(b"DCut"))
        .await
        .expect("second batch");
    assert_eq!(second.packet_id, 2);
}

#[tokio::test]
async fn test_resend_of_unknown_id_answered_as_empty_ack_request() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    switcher.request_resend(0x77).await;

    let substitute = switcher
        .expect_frame(DEFAULT_TIMEOUT, |f| {
            f.flags.contains(PacketFlags::ACK_REQUEST) && f.packet_id == 0x77
        })
        .await
        .expect("substitute frame");
    assert_eq!(substitute.length, 12);
}

// ============================================================================
// Event coalescing
// ============================================================================

#[tokio::test]
async fn test_event_coalescing_within_one_packet() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");

    let collector = EventCollector::new();
    client.on_event(collector.callback());
    activate(&switcher, &client).await;
    collector.clear();

    let id = switcher
        .send_commands(&[
            (b"PrgI", program_payload(0, 4)),
            (b"PrvI", preview_payload(0, 5)),
            (b"AuxS", aux_payload(1, 6)),
        ])
        .await;

    assert!(
        collector
            .wait_for_event(StateEvent::Aux, DEFAULT_TIMEOUT)
            .await,
        "aux event missing"
    );

    // Two source commands, one SOURCE event; one AUX event; nothing else.
    assert_eq!(collector.count_of(StateEvent::Source), 1);
    assert_eq!(collector.count_of(StateEvent::Aux), 1);
    assert_eq!(collector.count(), 2);
    assert!(collector.events().iter().all(|(_, packet)| *packet == id));
}

#[tokio::test]
async fn test_unsubscribe_stops_events() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");

    let collector = EventCollector::new();
    let subscription = client.on_event(collector.callback());
    activate(&switcher, &client).await;
    collector.clear();

    assert!(client.off_event(subscription));
    assert!(!client.off_event(subscription));

    let id = switcher
        .send_commands(&[(b"PrgI", program_payload(0, 4))])
        .await;
    switcher.expect_ack(id).await.expect("ack");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(collector.count(), 0);
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test]
async fn test_liveness_pings_then_reconnects() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    switcher
        .send_commands_with_id(1, &[(b"PrgI", program_payload(0, 5))])
        .await;
    switcher.expect_ack(1).await.expect("ack 1");

    // Go silent. The fourth empty second brings a ping that consumes a
    // fresh local id and acks our last packet.
    let ping = switcher
        .expect_frame(Duration::from_secs(6), |f| {
            f.flags.contains(PacketFlags::ACK_REQUEST)
                && f.flags.contains(PacketFlags::ACK_REPLY)
        })
        .await
        .expect("keep-alive ping");
    assert_eq!(ping.ack_id, 1);

    // The fifth declares the link dead: back to the hello.
    switcher
        .expect_frame(Duration::from_secs(4), atem_test_utils::Frame::is_hello)
        .await
        .expect("re-init after liveness timeout");

    assert!(
        wait_for(|| !client.connected(), DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT).await,
        "client still reports ACTIVE after the link died"
    );

    // The mirror was cleared with the session.
    let state = client.state().expect("state lock");
    assert_eq!(state.program_input(0), None);
    assert_eq!(state.topology(), None);
}

#[tokio::test]
async fn test_close_stops_the_receive_task() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");
    activate(&switcher, &client).await;

    client.close();
    assert!(!client.connected());

    // Drain anything in flight, then expect silence: no more hellos, no
    // more pings.
    while switcher
        .recv_frame(Duration::from_millis(1500))
        .await
        .is_some()
    {}
    assert!(
        switcher.recv_frame(Duration::from_secs(2)).await.is_none(),
        "client kept transmitting after close"
    );
}

// ============================================================================
// Send-path errors and lock budgets
// ============================================================================

#[tokio::test]
async fn test_send_commands_rejects_empty_batch() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");

    assert!(matches!(
        client.send_commands(Vec::new()),
        Err(ClientError::EmptyBatch)
    ));
}

#[tokio::test]
async fn test_send_commands_rejects_oversized_batch() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");

    // 250 cuts at 12 bytes each overflow the 2035-byte body ceiling.
    let batch = vec![Command::Cut { me: 0 }; 250];
    match client.send_commands(batch) {
        Err(ClientError::BatchTooLarge { size, max }) => {
            assert_eq!(size, 3000);
            assert_eq!(max, 2035);
        }
        other => panic!("expected BatchTooLarge, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn test_state_lock_budget_reported_to_caller() {
    let switcher = ScriptedSwitcher::bind().await;
    let client = Atem::connect(&switcher.addr()).await.expect("connect");

    let guard = client.state().expect("first acquisition");
    // Second acquisition cannot succeed while the guard lives; the
    // bounded wait reports instead of blocking forever.
    assert!(matches!(
        client.state().err(),
        Some(ClientError::StateLockTimeout)
    ));

    drop(guard);
    assert!(client.state().is_ok());
}
