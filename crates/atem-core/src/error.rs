//! Error types for the protocol core

use thiserror::Error;

/// Result type alias for protocol-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol-core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Datagram shorter than the session header
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Header length field disagrees with the received datagram
    #[error("declared length {declared} does not match datagram length {received}")]
    LengthMismatch { declared: u16, received: usize },

    /// Packet body would overflow the 11-bit length field
    #[error("packet too large: {0} bytes (max 2047)")]
    PacketTooLarge(usize),

    /// Parse cap reached; the remainder of the packet is dropped
    #[error("more than {0} commands in one packet")]
    TooManyCommands(usize),
}
