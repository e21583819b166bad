//! Client builder pattern

use crate::client::Atem;
use crate::error::{ClientError, Result};
use atem_core::DEFAULT_PORT;
use atem_transport::UdpLink;
use std::sync::Arc;

/// Builder for an [`Atem`] client
pub struct AtemBuilder {
    address: String,
    local_bind: Option<String>,
    retention: usize,
}

impl AtemBuilder {
    /// Create a new builder for the given switcher address
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            local_bind: None,
            retention: 32,
        }
    }

    /// Bind a specific local address instead of an ephemeral port
    pub fn local_bind(mut self, address: &str) -> Self {
        self.local_bind = Some(address.to_string());
        self
    }

    /// Capacity of the send-retention ring (floor 32)
    pub fn retention(mut self, entries: usize) -> Self {
        self.retention = entries.max(32);
        self
    }

    /// Open the socket, spawn the session engine, and return the client
    pub async fn connect(self) -> Result<Atem> {
        let target = if self.address.contains(':') {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, DEFAULT_PORT)
        };

        let remote = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| ClientError::InvalidAddress(format!("{}: {}", target, e)))?
            .next()
            .ok_or_else(|| ClientError::InvalidAddress(target.clone()))?;

        let link = match &self.local_bind {
            Some(local) => UdpLink::connect_from(local, remote).await?,
            None => UdpLink::connect(remote).await?,
        };

        Ok(Atem::start(Arc::new(link), self.retention))
    }
}
