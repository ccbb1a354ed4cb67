//! Per-stream byte reassembly.
//!
//! A stream's payload arrives as arbitrary `(offset, bytes)` segments:
//! out of order, duplicated, overlapping. The reassembler buffers them in
//! offset order and, on every arrival, emits the longest newly contiguous
//! prefix past the read cursor. Overlap is not merged at insertion; it is
//! resolved lazily at emission by skipping the already-consumed prefix of
//! each head segment. Emitted bytes are gone: emission never restarts.

use bytes::Bytes;
use thiserror::Error;

use ott_protocol::limits::MAX_STREAMS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("connection already has {MAX_STREAMS} live streams")]
    StreamLimit,
}

/// One buffered not-yet-delivered range.
#[derive(Debug)]
struct Segment {
    offset: u32,
    data: Bytes,
}

/// Reassembly state for a single stream.
#[derive(Debug, Default)]
struct Reassembler {
    next_offset: u32,
    /// Strictly offset-ordered. Ranges may overlap; ordering is the only
    /// insertion invariant.
    segments: Vec<Segment>,
}

impl Reassembler {
    /// Insert one segment, then drain the contiguous head into `out`,
    /// appending at most `budget` bytes. Returns the read cursor as it
    /// stood before this call.
    fn on_data(&mut self, offset: u32, data: &[u8], out: &mut Vec<u8>, budget: usize) -> u32 {
        let starting_offset = self.next_offset;

        let pos = self
            .segments
            .partition_point(|seg| seg.offset < offset);
        self.segments.insert(
            pos,
            Segment {
                offset,
                data: Bytes::copy_from_slice(data),
            },
        );

        self.consume(out, budget);
        starting_offset
    }

    fn consume(&mut self, out: &mut Vec<u8>, budget: usize) {
        let mut written = 0usize;
        while let Some(head) = self.segments.first_mut() {
            if head.offset > self.next_offset {
                break;
            }
            let start = (self.next_offset - head.offset) as usize;
            if start >= head.data.len() {
                // Entirely behind the cursor: a duplicate, drop it.
                self.segments.remove(0);
                continue;
            }
            let remaining = head.data.len() - start;
            let to_copy = remaining.min(budget - written);
            out.extend_from_slice(&head.data[start..start + to_copy]);
            written += to_copy;
            self.next_offset += to_copy as u32;

            if start + to_copy < head.data.len() {
                // Output budget exhausted: trim the consumed prefix and
                // leave the rest for the next arrival.
                let consumed = start + to_copy;
                head.offset += consumed as u32;
                head.data = head.data.slice(consumed..);
                break;
            }
            self.segments.remove(0);
            if written == budget {
                break;
            }
        }
    }

    fn reset(&mut self) {
        self.segments.clear();
        self.next_offset = 0;
    }
}

/// All reassembly state of one connection, keyed by stream id and capped
/// at [`MAX_STREAMS`] live streams.
#[derive(Debug, Default)]
pub struct StreamSet {
    streams: Vec<(u32, Reassembler)>,
}

impl StreamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one segment into `stream_id`, creating the stream on first
    /// use. Newly contiguous bytes are appended to `out` (bounded by
    /// `budget`); the returned offset is the stream's read cursor before
    /// this call.
    pub fn on_data(
        &mut self,
        stream_id: u32,
        offset: u32,
        data: &[u8],
        out: &mut Vec<u8>,
        budget: usize,
    ) -> Result<u32, ReassemblyError> {
        let index = match self.streams.iter().position(|(id, _)| *id == stream_id) {
            Some(index) => index,
            None => {
                if self.streams.len() >= MAX_STREAMS {
                    return Err(ReassemblyError::StreamLimit);
                }
                self.streams.push((stream_id, Reassembler::default()));
                self.streams.len() - 1
            }
        };
        Ok(self.streams[index].1.on_data(offset, data, out, budget))
    }

    /// Discard buffered segments of `stream_id` and rewind its cursor to
    /// zero. Unknown stream ids are ignored.
    pub fn reset(&mut self, stream_id: u32) {
        if let Some((_, stream)) = self.streams.iter_mut().find(|(id, _)| *id == stream_id) {
            stream.reset();
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}
