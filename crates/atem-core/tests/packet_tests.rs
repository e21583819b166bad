//! Framing tests for atem-core

use atem_core::{Packet, PacketFlags, PacketView, HEADER_SIZE, MAX_PACKET_SIZE};

const FLAG_SAMPLES: [PacketFlags; 6] = [
    PacketFlags::NONE,
    PacketFlags::ACK_REQUEST,
    PacketFlags::INIT,
    PacketFlags::RESEND_REQUEST,
    PacketFlags::ACK_REPLY,
    PacketFlags::RETRANSMISSION,
];

#[test]
fn test_header_roundtrip_sweep() {
    let lengths = [12u16, 13, 20, 100, 1024, 2047];
    let ids = [0u16, 1, 0x00FF, 0x0100, 0x3FFF, 0x4000, 0x7FFE, 0x7FFF];

    for &flags in &FLAG_SAMPLES {
        for &length in &lengths {
            for &id in &ids {
                let session = id ^ 0x0B06;
                let mut packet = Packet::new(flags, session, length);
                packet.set_ack_id(id);
                packet.set_resend_id(id.wrapping_add(1) & 0x7FFF);
                packet.set_packet_id(id.wrapping_add(2) & 0x7FFF);

                let view = packet.view();
                assert_eq!(view.flags(), flags);
                assert_eq!(view.length(), length);
                assert_eq!(view.session_id(), session);
                assert_eq!(view.ack_id(), id);
                assert_eq!(view.resend_id(), id.wrapping_add(1) & 0x7FFF);
                assert_eq!(view.packet_id(), id.wrapping_add(2) & 0x7FFF);
            }
        }
    }
}

#[test]
fn test_combined_flags_roundtrip() {
    for &a in &FLAG_SAMPLES {
        for &b in &FLAG_SAMPLES {
            let packet = Packet::new(a | b, 1, 12);
            assert_eq!(packet.view().flags(), a | b);
        }
    }
}

#[test]
fn test_flag_bits_do_not_disturb_length() {
    // Every flag combination on top of every length: the decoder masks
    // the high five bits away.
    for bits in 0u8..=0x1F {
        let flags = PacketFlags::from_byte(bits);
        for &length in &[12u16, 0x07FF, 0x0700, 300] {
            let packet = Packet::new(flags, 0, length);
            assert_eq!(packet.view().length(), length);
        }
    }

    // And from raw bytes: all of 0xF8 set.
    let mut raw = vec![0u8; 2047];
    raw[0] = 0xF8 | 0x07;
    raw[1] = 0xFF;
    let view = PacketView::parse(&raw).unwrap();
    assert_eq!(view.length(), 0x07FF);
}

#[test]
fn test_minimum_packet_floor() {
    // Construction never yields less than the header.
    let packet = Packet::new(PacketFlags::ACK_REPLY, 1, 0);
    assert_eq!(packet.view().length(), HEADER_SIZE as u16);
    assert_eq!(packet.as_bytes().len(), HEADER_SIZE);
}

#[test]
fn test_body_at_the_ceiling() {
    let body = vec![0xABu8; MAX_PACKET_SIZE - HEADER_SIZE];
    let packet = Packet::from_body(PacketFlags::ACK_REQUEST, 7, &body).unwrap();
    assert_eq!(packet.view().length() as usize, MAX_PACKET_SIZE);
    assert_eq!(packet.view().body(), &body[..]);

    let over = vec![0u8; MAX_PACKET_SIZE - HEADER_SIZE + 1];
    assert!(Packet::from_body(PacketFlags::ACK_REQUEST, 7, &over).is_err());
}

#[test]
fn test_zeroed_header_fields_on_construction() {
    let packet = Packet::new(PacketFlags::INIT, 0x0B06, 20);
    let view = packet.view();
    assert_eq!(view.ack_id(), 0);
    assert_eq!(view.resend_id(), 0);
    assert_eq!(view.unknown(), 0);
    assert_eq!(view.packet_id(), 0);
    assert_eq!(view.body(), &[0u8; 8]);
}
