//! Frozen wire and JSON contract vectors.
//!
//! These pin exact bytes and exact JSON shapes so either side of the
//! protocol can be reimplemented against this file alone. Changing any
//! assertion here is a protocol break, not a refactor.

use bytes::Bytes;
use ott_protocol::{
    ClientCommand, HEADER_LEN, MAX_PAYLOAD, Packet, PacketFlags, SegmentKind, ServerEvent,
    media::{decode_media_frame, encode_media_frame},
};

// ---------------------------------------------------------------------------
// Datagram wire vectors
// ---------------------------------------------------------------------------

/// The handshake-scenario DATA packet, byte for byte.
#[test]
fn data_packet_wire_vector() {
    let packet = Packet {
        flags: PacketFlags::DATA,
        connection_id: 0x00AB_CDEF,
        packet_number: 7,
        stream_id: 2,
        offset: 0,
        payload: Bytes::from_static(&[0x10, 0x20, 0x30]),
    };
    let wire = packet.encode().unwrap();
    assert_eq!(
        wire,
        [
            0x04, // DATA
            0x00, 0x00, 0x00, 0x00, 0x00, 0xAB, 0xCD, 0xEF, // connection id
            0x00, 0x00, 0x00, 0x07, // packet number
            0x00, 0x00, 0x00, 0x02, // stream id
            0x00, 0x00, 0x00, 0x00, // offset
            0x00, 0x00, 0x00, 0x03, // payload length
            0x10, 0x20, 0x30,
        ]
    );
    assert_eq!(Packet::decode(&wire).unwrap(), packet);
}

#[test]
fn flag_bits_are_frozen() {
    assert_eq!(PacketFlags::INITIAL.bits(), 0x01);
    assert_eq!(PacketFlags::HANDSHAKE.bits(), 0x02);
    assert_eq!(PacketFlags::DATA.bits(), 0x04);
    assert_eq!(PacketFlags::ACK.bits(), 0x08);
    assert_eq!(PacketFlags::CLOSE.bits(), 0x10);
}

#[test]
fn boundary_datagram_sizes() {
    let max = Packet {
        flags: PacketFlags::DATA,
        connection_id: 1,
        packet_number: 1,
        stream_id: 1,
        offset: 0,
        payload: Bytes::from(vec![0u8; MAX_PAYLOAD]),
    };
    // 16384-byte payload serializes to exactly 16409 bytes.
    assert_eq!(max.encode().unwrap().len(), 16_409);
    assert_eq!(HEADER_LEN, 25);

    let over = Packet {
        payload: Bytes::from(vec![0u8; MAX_PAYLOAD + 1]),
        ..max
    };
    assert!(over.encode().is_err());
}

/// Serialization is injective on the header fields: two packets that
/// differ in any field produce different bytes.
#[test]
fn serialization_is_injective_on_header_fields() {
    let base = Packet {
        flags: PacketFlags::DATA,
        connection_id: 5,
        packet_number: 6,
        stream_id: 7,
        offset: 8,
        payload: Bytes::from_static(b"xy"),
    };
    let variants = [
        Packet { flags: PacketFlags::ACK, ..base.clone() },
        Packet { connection_id: 55, ..base.clone() },
        Packet { packet_number: 66, ..base.clone() },
        Packet { stream_id: 77, ..base.clone() },
        Packet { offset: 88, ..base.clone() },
        Packet { payload: Bytes::from_static(b"xz"), ..base.clone() },
    ];
    let base_wire = base.encode().unwrap();
    for variant in variants {
        assert_ne!(variant.encode().unwrap(), base_wire, "{variant:?}");
    }
}

// ---------------------------------------------------------------------------
// Command / event JSON vectors
// ---------------------------------------------------------------------------

#[test]
fn quic_send_command_json_shape() {
    let cmd: ClientCommand = serde_json::from_str(
        r#"{"type":"quic_send","connection_id":11259375,"stream_id":2,"offset":16,"payload_hex":"a0b1"}"#,
    )
    .unwrap();
    assert_eq!(
        cmd,
        ClientCommand::QuicSend {
            connection_id: 11_259_375,
            stream_id: 2,
            offset: 16,
            payload_hex: "a0b1".to_owned(),
        }
    );
}

#[test]
fn error_event_json_shape() {
    let json = serde_json::to_string(&ServerEvent::error("unauthorized", "login-required")).unwrap();
    assert_eq!(
        json,
        r#"{"type":"error","status":"unauthorized","message":"login-required"}"#
    );
}

#[test]
fn ws_init_event_json_shape() {
    let json = serde_json::to_string(&ServerEvent::WsInit {
        status: "ok".to_owned(),
        duration: 93,
        total_segments: 24,
    })
    .unwrap();
    assert_eq!(
        json,
        r#"{"type":"ws_init","status":"ok","duration":93,"total_segments":24}"#
    );
}

// ---------------------------------------------------------------------------
// Media frame vectors
// ---------------------------------------------------------------------------

#[test]
fn media_frame_headers_are_frozen() {
    let init = encode_media_frame(SegmentKind::Init, 0, b"ftyp");
    assert_eq!(&init[..8], b"INIT\x00\x00\x00\x00");

    let segment = encode_media_frame(SegmentKind::Media, 258, b"mdat");
    assert_eq!(&segment[..8], b"SEGM\x00\x00\x01\x02");

    let parsed = decode_media_frame(&segment).unwrap();
    assert_eq!(parsed.index, 258);
    assert_eq!(parsed.data, b"mdat");
}
