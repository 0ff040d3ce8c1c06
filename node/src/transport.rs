//! UDP socket wrapper shared by every task that talks to peers

use crate::peers::PeerRecord;
use log::{debug, warn};
use shared::{Packet, TransportError, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Cheap-to-clone handle over the node's single UDP socket
#[derive(Clone)]
pub struct Transport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl Transport {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        debug!("Peer transport bound to {}", local_addr);

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fire-and-forget write of one packet.
    pub async fn send(&self, addr: SocketAddr, packet: &Packet) -> Result<(), TransportError> {
        let data = packet.encode()?;
        self.socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Sends `packet` to every address and returns how many writes succeeded.
    pub async fn broadcast(&self, addrs: &[SocketAddr], packet: &Packet) -> usize {
        let data = match packet.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!("Not broadcasting packet: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for addr in addrs {
            match self.socket.send_to(&data, addr).await {
                Ok(_) => delivered += 1,
                Err(e) => warn!("Failed to send to {}: {}", addr, e),
            }
        }
        delivered
    }

    /// Opens the discovery handshake with every peer that has not answered one yet.
    pub async fn flood_discovery(&self, peers: &[PeerRecord], discovery: &Packet) -> usize {
        let addrs: Vec<SocketAddr> = peers
            .iter()
            .filter(|peer| !peer.connected)
            .map(|peer| peer.addr)
            .collect();

        if addrs.is_empty() {
            return 0;
        }
        debug!("Flooding discovery to {} peers", addrs.len());
        self.broadcast(&addrs, discovery).await
    }

    /// Waits for the next datagram.
    pub async fn recv(&self) -> Result<(Packet, SocketAddr), (TransportError, Option<SocketAddr>)> {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE * 2];
        let (len, addr) = self
            .socket
            .recv_from(&mut buffer)
            .await
            .map_err(|e| (TransportError::Io(e), None))?;

        Packet::decode(&buffer[..len])
            .map(|packet| (packet, addr))
            .map_err(|e| (e, Some(addr)))
    }
}
