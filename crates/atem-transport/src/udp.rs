//! UDP transport implementation

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Datagram;

/// A UDP socket connected to one switcher
///
/// Cheap to clone; all clones share the underlying socket.
#[derive(Clone)]
pub struct UdpLink {
    socket: Arc<UdpSocket>,
}

impl UdpLink {
    /// Bind an ephemeral local port and connect to the peer
    pub async fn connect(remote: SocketAddr) -> Result<Self> {
        Self::connect_from("0.0.0.0:0", remote).await
    }

    /// Bind a specific local address and connect to the peer
    pub async fn connect_from(local: &str, remote: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        socket
            .connect(remote)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!(
            "udp link {} -> {}",
            socket.local_addr().map_err(TransportError::Io)?,
            remote
        );

        Ok(UdpLink {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }
}

#[async_trait]
impl Datagram for UdpLink {
    async fn send(&self, data: &[u8]) -> Result<usize> {
        self.socket
            .send(data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn try_send(&self, data: &[u8]) -> Result<usize> {
        self.socket
            .try_send(data)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.socket.recv(buf).await?)
    }
}
