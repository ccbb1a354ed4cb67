// ott-transport: the datagram transport engine and its stream reassembler.
//
// One engine owns one UDP socket, a bounded connection table and a
// retransmit queue, and runs a single background receive/timer task.
// Ordered stream bytes and connection state changes surface through
// registered upcall hooks.

pub mod engine;
pub mod reassembler;

pub use engine::{
    ConnectionState, EngineConfig, EngineError, TransportEngine, TransportMetrics,
};
pub use reassembler::{ReassemblyError, StreamSet};
