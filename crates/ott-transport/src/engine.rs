//! The datagram transport engine.
//!
//! Owns one UDP socket and a bounded connection table, drives the
//! handshake/close state machine, reliable DATA delivery with
//! retransmission, idle eviction, and address migration. A single
//! background task runs the receive/timer loop; everything else calls in
//! through [`TransportEngine`] handles, which are cheap to clone.
//!
//! Locking: one mutex guards the table, the pending queue, the metrics
//! and the hook registry. It is never held across an `await` or a hook
//! invocation; the loop collects the work it decided on under the lock
//! and performs sends and upcalls after releasing it, so handlers are
//! free to call back into `send`/`close_connection`.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use ott_protocol::limits::{CONNECTION_TIMEOUT_SECS, MAX_CONNECTIONS, MAX_PENDING};
use ott_protocol::{MAX_DATAGRAM, Packet, PacketFlags, WireError};

use crate::reassembler::StreamSet;

/// Output budget of one reassembly emission. Longer contiguous runs are
/// delivered across subsequent arrivals.
const REASSEMBLY_BUDGET: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        })
    }
}

/// Engine-wide counters; snapshots are returned by value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub connections_migrated: u64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// UDP port to bind; 0 picks a free port.
    pub port: u16,
    /// Blocking-receive timeout; also the timer cadence for sweeps and
    /// retransmission.
    pub recv_timeout: Duration,
    /// Inactivity window after which a connection is evicted.
    pub connection_timeout: Duration,
    /// Age at which an unacked DATA packet is resent.
    pub retransmit_interval: Duration,
    /// Resend attempts before a pending record is discarded.
    pub max_retries: u32,
    pub max_connections: usize,
    pub max_pending: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 0,
            recv_timeout: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            retransmit_interval: Duration::from_secs(1),
            max_retries: 3,
            max_connections: MAX_CONNECTIONS,
            max_pending: MAX_PENDING,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("socket: {0}")]
    Io(#[from] io::Error),
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("unknown connection {0:#x}")]
    ConnectionNotFound(u64),
    #[error("engine loop already started")]
    AlreadyStarted,
}

pub type StateHook = Arc<dyn Fn(u64, ConnectionState, SocketAddr) + Send + Sync>;
pub type StreamDataHook = Arc<dyn Fn(u64, u32, u32, &[u8]) + Send + Sync>;
pub type PacketHook = Arc<dyn Fn(&Packet, SocketAddr) + Send + Sync>;

struct Connection {
    addr: SocketAddr,
    last_seen: Instant,
    state: ConnectionState,
    streams: StreamSet,
}

struct PendingPacket {
    connection_id: u64,
    packet_number: u32,
    bytes: Vec<u8>,
    first_sent: Instant,
    retries: u32,
}

#[derive(Default)]
struct Hooks {
    state: Option<StateHook>,
    stream: Option<StreamDataHook>,
    packet: Option<PacketHook>,
}

struct EngineState {
    connections: HashMap<u64, Connection>,
    pending: Vec<PendingPacket>,
    metrics: TransportMetrics,
    hooks: Hooks,
    recv_timeout: Duration,
}

/// Work decided under the lock, performed after it is released.
enum Action {
    StateEvent(u64, ConnectionState, SocketAddr),
    StreamEvent(u64, u32, u32, Vec<u8>),
    SendPacket(Packet, SocketAddr),
    /// Retransmission of already-serialized bytes; not re-queued.
    SendRaw(Vec<u8>, SocketAddr),
}

struct Shared {
    socket: UdpSocket,
    config: EngineConfig,
    state: Mutex<EngineState>,
    running: AtomicBool,
    shutdown: Notify,
}

/// Cloneable handle to one engine.
#[derive(Clone)]
pub struct TransportEngine {
    shared: Arc<Shared>,
    loop_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TransportEngine {
    /// Bind the UDP socket and build an idle engine. The receive loop
    /// does not run until [`start`](Self::start).
    pub async fn bind(config: EngineConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        let recv_timeout = config.recv_timeout;
        Ok(Self {
            shared: Arc::new(Shared {
                socket,
                config,
                state: Mutex::new(EngineState {
                    connections: HashMap::new(),
                    pending: Vec::new(),
                    metrics: TransportMetrics::default(),
                    hooks: Hooks::default(),
                    recv_timeout,
                }),
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
            loop_task: Arc::new(Mutex::new(None)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// Spawn the receive/timer loop.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { run_loop(shared).await });
        *self.loop_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Request the loop to exit. Safe to call more than once.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.shutdown.notify_waiters();
    }

    /// Wait for the loop task to finish. No-op if never started.
    pub async fn join(&self) {
        let handle = self.loop_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// `stop` + `join`.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }

    pub fn set_state_handler<F>(&self, hook: F)
    where
        F: Fn(u64, ConnectionState, SocketAddr) + Send + Sync + 'static,
    {
        self.shared.state.lock().unwrap().hooks.state = Some(Arc::new(hook));
    }

    pub fn set_stream_data_handler<F>(&self, hook: F)
    where
        F: Fn(u64, u32, u32, &[u8]) + Send + Sync + 'static,
    {
        self.shared.state.lock().unwrap().hooks.stream = Some(Arc::new(hook));
    }

    pub fn set_packet_handler<F>(&self, hook: F)
    where
        F: Fn(&Packet, SocketAddr) + Send + Sync + 'static,
    {
        self.shared.state.lock().unwrap().hooks.packet = Some(Arc::new(hook));
    }

    /// Serialize and emit one datagram. DATA-flagged packets are also
    /// recorded for retransmission until acked.
    pub async fn send(&self, packet: &Packet, addr: SocketAddr) -> Result<(), EngineError> {
        self.shared.send_packet(packet, addr).await
    }

    /// [`send`](Self::send) to the table-recorded address of the
    /// packet's connection.
    pub async fn send_to_connection(&self, packet: &Packet) -> Result<(), EngineError> {
        let addr = self
            .connection_addr(packet.connection_id)
            .ok_or(EngineError::ConnectionNotFound(packet.connection_id))?;
        self.send(packet, addr).await
    }

    pub fn connection_addr(&self, connection_id: u64) -> Option<SocketAddr> {
        self.shared
            .state
            .lock()
            .unwrap()
            .connections
            .get(&connection_id)
            .map(|c| c.addr)
    }

    pub fn connection_state(&self, connection_id: u64) -> Option<ConnectionState> {
        self.shared
            .state
            .lock()
            .unwrap()
            .connections
            .get(&connection_id)
            .map(|c| c.state)
    }

    /// Close and evict a connection: free its reassemblers, purge its
    /// pending records, notify the peer with a CLOSE datagram and fire
    /// the state hook. Unknown ids report `ConnectionNotFound`.
    pub async fn close_connection(&self, connection_id: u64) -> Result<(), EngineError> {
        let (addr, hook) = {
            let mut state = self.shared.state.lock().unwrap();
            let Some(conn) = state.connections.remove(&connection_id) else {
                return Err(EngineError::ConnectionNotFound(connection_id));
            };
            state.pending.retain(|p| p.connection_id != connection_id);
            state.metrics.connections_closed += 1;
            (conn.addr, state.hooks.state.clone())
        };
        let close = Packet::bare(PacketFlags::CLOSE, connection_id, 0);
        if let Err(e) = self.send(&close, addr).await {
            debug!(connection_id, error = %e, "close notification not sent");
        }
        if let Some(hook) = hook {
            hook(connection_id, ConnectionState::Closed, addr);
        }
        Ok(())
    }

    pub fn metrics(&self) -> TransportMetrics {
        self.shared.state.lock().unwrap().metrics
    }

    /// Adjust the receive timeout and with it the sweep cadence.
    pub fn set_recv_timeout(&self, timeout: Duration) {
        self.shared.state.lock().unwrap().recv_timeout = timeout;
    }
}

impl Shared {
    async fn send_packet(&self, packet: &Packet, addr: SocketAddr) -> Result<(), EngineError> {
        let bytes = packet.encode()?;
        self.socket.send_to(&bytes, addr).await?;
        let mut state = self.state.lock().unwrap();
        state.metrics.packets_sent += 1;
        if packet.flags.contains(PacketFlags::DATA) {
            if state.pending.len() >= self.config.max_pending {
                let evicted = state.pending.remove(0);
                debug!(
                    connection_id = evicted.connection_id,
                    packet_number = evicted.packet_number,
                    "pending queue full, dropping oldest record"
                );
            }
            state.pending.push(PendingPacket {
                connection_id: packet.connection_id,
                packet_number: packet.packet_number,
                bytes,
                first_sent: Instant::now(),
                retries: 0,
            });
        }
        Ok(())
    }

    async fn perform(&self, actions: Vec<Action>) {
        let (state_hook, stream_hook) = {
            let state = self.state.lock().unwrap();
            (state.hooks.state.clone(), state.hooks.stream.clone())
        };
        for action in actions {
            match action {
                Action::StateEvent(id, conn_state, addr) => {
                    if let Some(hook) = &state_hook {
                        hook(id, conn_state, addr);
                    }
                }
                Action::StreamEvent(id, stream_id, offset, data) => {
                    if let Some(hook) = &stream_hook {
                        hook(id, stream_id, offset, &data);
                    }
                }
                Action::SendPacket(packet, addr) => {
                    if let Err(e) = self.send_packet(&packet, addr).await {
                        debug!(addr = %addr, error = %e, "engine reply not sent");
                    }
                }
                Action::SendRaw(bytes, addr) => match self.socket.send_to(&bytes, addr).await {
                    Ok(_) => self.state.lock().unwrap().metrics.packets_sent += 1,
                    Err(e) => debug!(addr = %addr, error = %e, "retransmit not sent"),
                },
            }
        }
    }

    /// Steps 1-11 of the per-datagram contract. Returns the upcalls and
    /// replies to perform once the lock is gone.
    fn process_datagram(&self, buf: &[u8], from: SocketAddr) -> (Vec<Action>, Option<Packet>) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.metrics.packets_received += 1;

        let Ok(packet) = Packet::decode(buf) else {
            trace!(addr = %from, len = buf.len(), "dropping malformed datagram");
            return (Vec::new(), None);
        };

        let mut actions = Vec::new();
        let id = packet.connection_id;

        if packet.flags.contains(PacketFlags::ACK) {
            state
                .pending
                .retain(|p| !(p.connection_id == id && p.packet_number == packet.packet_number));
        }

        let mut known = false;
        if let Some(conn) = state.connections.get_mut(&id) {
            known = true;
            if conn.addr == from {
                conn.last_seen = Instant::now();
            } else {
                conn.addr = from;
                let current = conn.state;
                state.metrics.connections_migrated += 1;
                actions.push(Action::StateEvent(id, current, from));
            }
        }
        if !known {
            if !packet.flags.contains(PacketFlags::INITIAL) {
                // No table entry and nothing to create one from.
                // HANDSHAKE-flagged strays still reach the packet hook.
                if packet.flags.contains(PacketFlags::HANDSHAKE) {
                    return (actions, Some(packet));
                }
                return (actions, None);
            }
            if state.connections.len() >= self.config.max_connections {
                debug!(connection_id = id, "connection table full, INITIAL rejected");
                return (actions, None);
            }
            state.connections.insert(
                id,
                Connection {
                    addr: from,
                    last_seen: Instant::now(),
                    state: ConnectionState::Connecting,
                    streams: StreamSet::new(),
                },
            );
            state.metrics.connections_opened += 1;
            actions.push(Action::StateEvent(id, ConnectionState::Connecting, from));
            let reply = Packet::bare(PacketFlags::HANDSHAKE | PacketFlags::ACK, id, 1);
            actions.push(Action::SendPacket(reply, from));
        }

        if packet.flags.contains(PacketFlags::CLOSE) {
            if let Some(conn) = state.connections.remove(&id) {
                state.pending.retain(|p| p.connection_id != id);
                state.metrics.connections_closed += 1;
                actions.push(Action::StateEvent(id, ConnectionState::Closed, conn.addr));
            }
            return (actions, None);
        }

        if packet.flags.contains(PacketFlags::HANDSHAKE) {
            if let Some(conn) = state.connections.get_mut(&id) {
                if conn.state == ConnectionState::Connecting {
                    conn.state = ConnectionState::Connected;
                    actions.push(Action::StateEvent(id, ConnectionState::Connected, conn.addr));
                }
            }
        }

        let connected = state
            .connections
            .get(&id)
            .is_some_and(|c| c.state == ConnectionState::Connected);
        let deliverable = connected
            || packet
                .flags
                .intersects(PacketFlags::INITIAL | PacketFlags::HANDSHAKE);
        if !deliverable {
            return (actions, None);
        }

        if packet.flags.contains(PacketFlags::DATA) {
            if let Some(conn) = state.connections.get_mut(&id) {
                let mut assembled = Vec::new();
                match conn.streams.on_data(
                    packet.stream_id,
                    packet.offset,
                    &packet.payload,
                    &mut assembled,
                    REASSEMBLY_BUDGET,
                ) {
                    Ok(starting_offset) => {
                        if !assembled.is_empty() {
                            actions.push(Action::StreamEvent(
                                id,
                                packet.stream_id,
                                starting_offset,
                                assembled,
                            ));
                        }
                    }
                    Err(e) => warn!(connection_id = id, stream_id = packet.stream_id, error = %e,
                        "stream data dropped"),
                }
                let mut ack = Packet::bare(PacketFlags::ACK, id, packet.packet_number);
                ack.stream_id = packet.stream_id;
                ack.offset = packet.offset;
                actions.push(Action::SendPacket(ack, from));
            }
        }

        (actions, Some(packet))
    }

    /// Timer pass: evict idle connections, then retransmit aged pending
    /// records to each owner's current address.
    fn process_tick(&self) -> Vec<Action> {
        let now = Instant::now();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let mut actions = Vec::new();

        let timeout = self.config.connection_timeout;
        let expired: Vec<u64> = state
            .connections
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_seen) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(conn) = state.connections.remove(&id) {
                state.metrics.connections_closed += 1;
                debug!(connection_id = id, "evicting idle connection");
                actions.push(Action::StateEvent(id, ConnectionState::Closed, conn.addr));
            }
        }

        let interval = self.config.retransmit_interval;
        let max_retries = self.config.max_retries;
        let mut keep = Vec::with_capacity(state.pending.len());
        for mut record in std::mem::take(&mut state.pending) {
            if now.duration_since(record.first_sent) < interval {
                keep.push(record);
                continue;
            }
            // Owner gone (closed or evicted): drop the record.
            let Some(conn) = state.connections.get(&record.connection_id) else {
                continue;
            };
            actions.push(Action::SendRaw(record.bytes.clone(), conn.addr));
            record.retries += 1;
            if record.retries >= max_retries {
                debug!(
                    connection_id = record.connection_id,
                    packet_number = record.packet_number,
                    "retransmit retries exhausted"
                );
            } else {
                keep.push(record);
            }
        }
        state.pending = keep;

        actions
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while shared.running.load(Ordering::SeqCst) {
        let recv_timeout = shared.state.lock().unwrap().recv_timeout;
        tokio::select! {
            () = shared.shutdown.notified() => break,
            recv = tokio::time::timeout(recv_timeout, shared.socket.recv_from(&mut buf)) => {
                match recv {
                    Ok(Ok((len, from))) => {
                        let (actions, packet) = shared.process_datagram(&buf[..len], from);
                        shared.perform(actions).await;
                        if let Some(packet) = packet {
                            let hook = shared.state.lock().unwrap().hooks.packet.clone();
                            if let Some(hook) = hook {
                                hook(&packet, from);
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        if shared.running.load(Ordering::SeqCst) {
                            warn!(error = %e, "udp receive failed");
                        }
                    }
                    Err(_) => {
                        let actions = shared.process_tick();
                        shared.perform(actions).await;
                    }
                }
            }
        }
    }
    debug!("engine loop stopped");
}
