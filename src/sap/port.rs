//! SAP ports
//!
//! A port delivers every received datagram as a [`PortEvent`]: the decoded
//! packet, or the decode error for that datagram. A bad datagram never stops
//! the port.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cleanup::lock;
use crate::error::{ProtocolError, Result};

use super::config::SapConfig;
use super::constants::MAX_PACKET_SIZE;
use super::packet::Packet;

/// Something received on a port
#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    Packet(Packet),
    /// A datagram that could not be decoded
    Error(ProtocolError),
}

/// Multicast socket boundary
pub trait Port: Send + Sync + 'static {
    /// Receive every event from now on
    fn subscribe(&self) -> broadcast::Receiver<PortEvent>;

    /// Send an encoded packet to the group
    fn send(&self, packet: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Address of the local interface
    fn interface_addr(&self) -> Ipv4Addr;
}

/// Decode a datagram and hand it to subscribers
fn dispatch(events: &broadcast::Sender<PortEvent>, datagram: Bytes, from: Option<SocketAddr>) {
    let event = match Packet::decode(datagram.clone()) {
        Ok(packet) => {
            match packet.encode() {
                Ok(bytes) if bytes == datagram => {}
                _ => tracing::warn!(
                    from = ?from,
                    hash = packet.hash,
                    "Packet does not re-encode to the received bytes"
                ),
            }
            PortEvent::Packet(packet)
        }
        Err(e) => {
            tracing::debug!(from = ?from, error = %e, "Dropping undecodable datagram");
            PortEvent::Error(e)
        }
    };
    // No subscribers is fine
    let _ = events.send(event);
}

/// UDP multicast port
pub struct UdpPort {
    socket: Arc<UdpSocket>,
    events: broadcast::Sender<PortEvent>,
    config: SapConfig,
    token: CancellationToken,
}

impl UdpPort {
    /// Bind, join the multicast group and start receiving
    pub async fn bind(config: SapConfig) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&config.bind_addr.into())?;
        socket.join_multicast_v4(&config.multicast_group, &config.interface)?;
        socket.set_multicast_if_v4(&config.interface)?;
        socket.set_multicast_loop_v4(config.multicast_loop)?;

        let socket = Arc::new(UdpSocket::from_std(socket.into())?);
        let (events, _) = broadcast::channel(config.event_capacity);
        let token = CancellationToken::new();

        tracing::info!(
            addr = %config.bind_addr,
            group = %config.multicast_group,
            interface = %config.interface,
            "SAP port listening"
        );

        tokio::spawn(recv_loop(
            Arc::clone(&socket),
            events.clone(),
            token.clone(),
        ));

        Ok(Self {
            socket,
            events,
            config,
            token,
        })
    }

    /// Stop receiving
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn config(&self) -> &SapConfig {
        &self.config
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Drop for UdpPort {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    events: broadcast::Sender<PortEvent>,
    token: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let (len, from) = tokio::select! {
            _ = token.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!(error = %e, "SAP port receive failed");
                    continue;
                }
            },
        };

        dispatch(&events, Bytes::copy_from_slice(&buf[..len]), Some(from));
    }

    tracing::debug!("SAP port closed");
}

impl Port for UdpPort {
    fn subscribe(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }

    async fn send(&self, packet: Bytes) -> io::Result<()> {
        self.socket
            .send_to(&packet, self.config.destination())
            .await
            .map(|_| ())
    }

    fn interface_addr(&self) -> Ipv4Addr {
        self.config.interface
    }
}

/// In-memory port
///
/// Records everything sent. Datagrams are delivered with
/// [`receive`](Self::receive); with loopback enabled, sent packets are
/// delivered back as well, like a multicast socket with `IP_MULTICAST_LOOP`.
pub struct MemoryPort {
    events: broadcast::Sender<PortEvent>,
    sent: Mutex<Vec<Bytes>>,
    interface: Ipv4Addr,
    loopback: bool,
}

impl MemoryPort {
    pub fn new(interface: Ipv4Addr) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            events,
            sent: Mutex::new(Vec::new()),
            interface,
            loopback: false,
        }
    }

    /// Deliver sent packets back to subscribers
    pub fn with_loopback(mut self) -> Self {
        self.loopback = true;
        self
    }

    /// Deliver a raw datagram as if it came off the wire
    pub fn receive(&self, datagram: Bytes) {
        dispatch(&self.events, datagram, None);
    }

    /// Deliver a packet as if it came off the wire
    pub fn receive_packet(&self, packet: &Packet) -> std::result::Result<(), ProtocolError> {
        self.receive(packet.encode()?);
        Ok(())
    }

    /// Every datagram sent so far
    pub fn sent(&self) -> Vec<Bytes> {
        lock(&self.sent).clone()
    }

    /// Decoded packets sent so far
    pub fn sent_packets(&self) -> Vec<Packet> {
        lock(&self.sent)
            .iter()
            .filter_map(|b| Packet::decode(b.clone()).ok())
            .collect()
    }

    /// Take and clear the sent log
    pub fn take_sent(&self) -> Vec<Packet> {
        std::mem::take(&mut *lock(&self.sent))
            .into_iter()
            .filter_map(|b| Packet::decode(b).ok())
            .collect()
    }
}

impl Port for MemoryPort {
    fn subscribe(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }

    async fn send(&self, packet: Bytes) -> io::Result<()> {
        lock(&self.sent).push(packet.clone());
        if self.loopback {
            self.receive(packet);
        }
        Ok(())
    }

    fn interface_addr(&self) -> Ipv4Addr {
        self.interface
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use crate::error::Feature;
    use crate::sdp::Sdp;

    use super::*;

    fn sdp() -> Sdp {
        Sdp::parse(crate::sdp::tests::example(1, "port")).unwrap()
    }

    #[tokio::test]
    async fn test_bad_datagram_is_reported_and_port_keeps_going() {
        let port = MemoryPort::new(Ipv4Addr::LOCALHOST);
        let mut rx = port.subscribe();

        port.receive(Bytes::from_static(&[0x30, 0, 0, 0, 1, 2, 3, 4, 0]));
        let packet = Packet::announcement(IpAddr::from([10, 0, 0, 1]), 5, &sdp());
        port.receive_packet(&packet).unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            PortEvent::Error(ProtocolError::UnsupportedFeature(Feature::Ipv6))
        );
        assert_eq!(rx.recv().await.unwrap(), PortEvent::Packet(packet));
    }

    #[tokio::test]
    async fn test_memory_port_records_and_loops_back() {
        let port = MemoryPort::new(Ipv4Addr::LOCALHOST).with_loopback();
        let mut rx = port.subscribe();

        let packet = Packet::retraction(IpAddr::from([10, 0, 0, 1]), 9, &sdp());
        port.send(packet.encode().unwrap()).await.unwrap();

        assert_eq!(port.sent_packets(), vec![packet.clone()]);
        assert_eq!(rx.recv().await.unwrap(), PortEvent::Packet(packet.clone()));
        assert_eq!(port.take_sent(), vec![packet]);
        assert!(port.sent().is_empty());
    }
}
