//! Binary framing for media delivered in-band over the WebSocket.
//!
//! A media frame is an 8-byte header: 4 ASCII magic bytes plus a 4-byte
//! big-endian segment index, followed by the raw DASH segment bytes. The
//! init segment always uses index 0.

use thiserror::Error;

/// Size of the magic + index prefix.
pub const MEDIA_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// DASH initialization segment (`"INIT"`).
    Init,
    /// Indexed DASH media segment (`"SEGM"`).
    Media,
}

impl SegmentKind {
    pub fn magic(self) -> &'static [u8; 4] {
        match self {
            Self::Init => b"INIT",
            Self::Media => b"SEGM",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaFrameError {
    #[error("frame of {0} bytes is shorter than the {MEDIA_HEADER_LEN}-byte header")]
    Truncated(usize),
    #[error("unknown media magic {0:?}")]
    BadMagic([u8; 4]),
}

/// A decoded media frame; `data` borrows from the WebSocket payload.
#[derive(Debug, PartialEq, Eq)]
pub struct MediaFrame<'a> {
    pub kind: SegmentKind,
    pub index: u32,
    pub data: &'a [u8],
}

/// Build the binary payload for one segment.
pub fn encode_media_frame(kind: SegmentKind, index: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MEDIA_HEADER_LEN + data.len());
    out.extend_from_slice(kind.magic());
    out.extend_from_slice(&index.to_be_bytes());
    out.extend_from_slice(data);
    out
}

/// Split a binary payload back into header and segment bytes.
pub fn decode_media_frame(buf: &[u8]) -> Result<MediaFrame<'_>, MediaFrameError> {
    if buf.len() < MEDIA_HEADER_LEN {
        return Err(MediaFrameError::Truncated(buf.len()));
    }
    let magic: [u8; 4] = buf[0..4].try_into().unwrap();
    let kind = match &magic {
        b"INIT" => SegmentKind::Init,
        b"SEGM" => SegmentKind::Media,
        _ => return Err(MediaFrameError::BadMagic(magic)),
    };
    let index = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    Ok(MediaFrame {
        kind,
        index,
        data: &buf[MEDIA_HEADER_LEN..],
    })
}
