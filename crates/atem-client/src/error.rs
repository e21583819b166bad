//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("empty command batch")]
    EmptyBatch,

    #[error("command batch of {size} bytes exceeds the {max}-byte packet ceiling")]
    BatchTooLarge { size: usize, max: usize },

    #[error("state lock not acquired within its budget")]
    StateLockTimeout,

    #[error("send lock not acquired within its budget")]
    SendLockTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] atem_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] atem_transport::TransportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
