//! Datagram wire format.
//!
//! Every datagram starts with a fixed 25-byte big-endian header:
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 1    | flags          |
//! | 1      | 8    | connection_id  |
//! | 9      | 4    | packet_number  |
//! | 13     | 4    | stream_id      |
//! | 17     | 4    | offset         |
//! | 21     | 4    | payload_length |
//! | 25     | N    | payload        |
//!
//! `payload_length` is capped at 16 KiB; a datagram whose declared length
//! exceeds its buffer is rejected (the receive path drops it silently).

use bitflags::bitflags;
use bytes::Bytes;
use thiserror::Error;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 25;
/// Maximum payload carried by one packet.
pub const MAX_PAYLOAD: usize = 16 * 1024;
/// Largest datagram either side will ever emit.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

bitflags! {
    /// Packet type bits. Combinations are legal (the handshake response
    /// carries HANDSHAKE|ACK).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const INITIAL   = 0x01;
        const HANDSHAKE = 0x02;
        const DATA      = 0x04;
        const ACK       = 0x08;
        const CLOSE     = 0x10;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte cap")]
    PayloadTooLarge(usize),
    #[error("buffer of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    Truncated(usize),
    #[error("declared payload length {declared} exceeds remaining {available} bytes")]
    LengthMismatch { declared: usize, available: usize },
}

/// One transport packet.
///
/// `payload` is cheaply cloneable; the receive path copies datagram bytes
/// into it exactly once at the decode boundary, so upcall handlers that
/// need to retain data hold their own reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub flags: PacketFlags,
    pub connection_id: u64,
    pub packet_number: u32,
    pub stream_id: u32,
    pub offset: u32,
    pub payload: Bytes,
}

impl Packet {
    /// A payload-less packet with the given flags and connection id.
    pub fn bare(flags: PacketFlags, connection_id: u64, packet_number: u32) -> Self {
        Self {
            flags,
            connection_id,
            packet_number,
            stream_id: 0,
            offset: 0,
            payload: Bytes::new(),
        }
    }

    /// Serialized size of this packet.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize into `out`, which is cleared first. Rejects oversized
    /// payloads; never writes a partial datagram.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }
        out.clear();
        out.reserve(self.wire_len());
        out.push(self.flags.bits());
        out.extend_from_slice(&self.connection_id.to_be_bytes());
        out.extend_from_slice(&self.packet_number.to_be_bytes());
        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Parse one datagram. The payload is copied out of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated(buf.len()));
        }
        let flags = PacketFlags::from_bits_retain(buf[0]);
        let connection_id = u64::from_be_bytes(buf[1..9].try_into().unwrap());
        let packet_number = u32::from_be_bytes(buf[9..13].try_into().unwrap());
        let stream_id = u32::from_be_bytes(buf[13..17].try_into().unwrap());
        let offset = u32::from_be_bytes(buf[17..21].try_into().unwrap());
        let declared = u32::from_be_bytes(buf[21..25].try_into().unwrap()) as usize;
        if declared > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(declared));
        }
        let available = buf.len() - HEADER_LEN;
        if declared > available {
            return Err(WireError::LengthMismatch {
                declared,
                available,
            });
        }
        Ok(Self {
            flags,
            connection_id,
            packet_number,
            stream_id,
            offset,
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + declared]),
        })
    }
}
