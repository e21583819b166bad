//! Transport trait definitions

use async_trait::async_trait;

use crate::error::Result;

/// A connected, bidirectional datagram channel
///
/// Both halves take `&self`: the session engine receives on one task while
/// user API calls send from others.
#[async_trait]
pub trait Datagram: Send + Sync {
    /// Send one datagram to the connected peer
    async fn send(&self, data: &[u8]) -> Result<usize>;

    /// Send without waiting for socket readiness; used by API paths that
    /// must not block
    fn try_send(&self, data: &[u8]) -> Result<usize>;

    /// Receive one datagram; oversized datagrams are truncated to `buf`
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;
}
