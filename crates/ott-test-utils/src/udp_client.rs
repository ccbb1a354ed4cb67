//! Raw UDP client speaking the datagram wire format.
//!
//! Used by the transport scenario tests to play the peer side of a
//! connection: send hand-built packets, await replies with a timeout,
//! and run the INITIAL/HANDSHAKE establishment dance.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use ott_protocol::{MAX_DATAGRAM, Packet, PacketFlags};
use tokio::net::UdpSocket;

pub struct UdpClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl UdpClient {
    /// Bind an ephemeral local socket aimed at `server`. An engine bound
    /// on the wildcard address is reached via loopback.
    pub async fn connect(mut server: SocketAddr) -> io::Result<Self> {
        if server.ip().is_unspecified() {
            server.set_ip(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
        }
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        Ok(Self { socket, server })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send(&self, packet: &Packet) -> io::Result<()> {
        let bytes = packet.encode().expect("test packet within bounds");
        self.socket.send_to(&bytes, self.server).await?;
        Ok(())
    }

    /// Receive one packet, failing after `timeout`.
    pub async fn recv(&self, timeout: Duration) -> io::Result<Packet> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no datagram"))??;
        Packet::decode(&buf[..len])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Receive packets until one matches `pred`, failing after `timeout`
    /// overall.
    pub async fn recv_matching<F>(&self, timeout: Duration, mut pred: F) -> io::Result<Packet>
    where
        F: FnMut(&Packet) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no matching datagram"))?;
            let packet = self.recv(remaining).await?;
            if pred(&packet) {
                return Ok(packet);
            }
        }
    }

    /// Run the two-step establishment for `connection_id`: INITIAL, wait
    /// for the HANDSHAKE|ACK reply, then confirm with HANDSHAKE.
    pub async fn establish(&self, connection_id: u64) -> io::Result<()> {
        self.send(&Packet::bare(PacketFlags::INITIAL, connection_id, 0))
            .await?;
        let reply = self.recv(Duration::from_secs(2)).await?;
        assert!(
            reply.flags.contains(PacketFlags::HANDSHAKE),
            "expected HANDSHAKE reply, got {:?}",
            reply.flags
        );
        assert_eq!(reply.connection_id, connection_id);
        self.send(&Packet::bare(PacketFlags::HANDSHAKE, connection_id, 1))
            .await?;
        Ok(())
    }
}
