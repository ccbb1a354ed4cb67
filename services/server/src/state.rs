//! Shared control-plane context.
//!
//! One value of this type is built at startup and handed to every
//! connection task. Mutable pieces (the transport packet-number counter
//! and the segment delivery tallies) sit behind one small mutex.

use std::sync::{Arc, Mutex};

use ott_transport::TransportEngine;

use crate::config::ServerConfig;
use crate::media::MediaTools;
use crate::session::SessionManager;
use crate::storage::Storage;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCounters {
    pub sent_ok: u64,
    pub sent_fail: u64,
}

struct Counters {
    next_packet_number: u32,
    segments: SegmentCounters,
}

pub struct ControlContext {
    pub engine: TransportEngine,
    pub storage: Arc<dyn Storage>,
    pub sessions: SessionManager,
    pub media: Arc<dyn MediaTools>,
    pub config: ServerConfig,
    counters: Mutex<Counters>,
}

impl ControlContext {
    pub fn new(
        engine: TransportEngine,
        storage: Arc<dyn Storage>,
        sessions: SessionManager,
        media: Arc<dyn MediaTools>,
        config: ServerConfig,
    ) -> Self {
        Self {
            engine,
            storage,
            sessions,
            media,
            config,
            counters: Mutex::new(Counters {
                next_packet_number: 1,
                segments: SegmentCounters::default(),
            }),
        }
    }

    /// Allocate the next outbound DATA packet number. Shared by every
    /// WebSocket session so transport packet numbers stay unique
    /// process-wide.
    pub fn next_packet_number(&self) -> u32 {
        let mut counters = self.counters.lock().unwrap();
        let n = counters.next_packet_number;
        counters.next_packet_number = counters.next_packet_number.wrapping_add(1);
        n
    }

    pub fn record_segment_sent(&self, ok: bool) {
        let mut counters = self.counters.lock().unwrap();
        if ok {
            counters.segments.sent_ok += 1;
        } else {
            counters.segments.sent_fail += 1;
        }
    }

    pub fn segment_counters(&self) -> SegmentCounters {
        self.counters.lock().unwrap().segments
    }
}
