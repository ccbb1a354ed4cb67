//! RFC6455 frame codec.
//!
//! Reads masked client frames (unmasking in place) and writes unmasked
//! server frames with FIN set. Inbound payloads are capped at 64 KiB; a
//! larger frame is fatal to the connection, as is an unknown opcode.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest inbound payload accepted before the connection is dropped.
pub const MAX_FRAME_PAYLOAD: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame payload of {0} bytes exceeds the {MAX_FRAME_PAYLOAD}-byte cap")]
    Oversized(u64),
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
}

#[derive(Debug)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// XOR `data` with the 4-byte mask; applying twice restores the input.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

pub async fn read_frame<S>(stream: &mut S) -> Result<Frame, FrameError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    let fin = header[0] & 0x80 != 0;
    let opcode_bits = header[0] & 0x0F;
    let opcode = OpCode::from_bits(opcode_bits).ok_or(FrameError::UnknownOpcode(opcode_bits))?;
    let masked = header[1] & 0x80 != 0;

    let mut payload_len = u64::from(header[1] & 0x7F);
    if payload_len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await?;
        payload_len = u64::from(u16::from_be_bytes(ext));
    } else if payload_len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).await?;
        payload_len = u64::from_be_bytes(ext);
    }
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::Oversized(payload_len));
    }

    let mut mask = [0u8; 4];
    if masked {
        stream.read_exact(&mut mask).await?;
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        stream.read_exact(&mut payload).await?;
        if masked {
            apply_mask(&mut payload, mask);
        }
    }

    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}

/// Write one unmasked frame with FIN set.
pub async fn write_frame<S>(stream: &mut S, opcode: OpCode, payload: &[u8]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut header = [0u8; 10];
    header[0] = 0x80 | opcode.bits();
    let header_len = if payload.len() <= 125 {
        header[1] = payload.len() as u8;
        2
    } else if payload.len() <= 0xFFFF {
        header[1] = 126;
        header[2..4].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        4
    } else {
        header[1] = 127;
        header[2..10].copy_from_slice(&(payload.len() as u64).to_be_bytes());
        10
    };
    stream.write_all(&header[..header_len]).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await
}
