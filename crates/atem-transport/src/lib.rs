//! Datagram transport for the ATEM switcher client
//!
//! The session engine consumes a connected datagram socket; acquiring the
//! network (interfaces, DHCP, WiFi) is the application's problem. This
//! crate provides the seam ([`Datagram`]) and the standard implementation
//! over a tokio UDP socket ([`UdpLink`]).

pub mod error;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use traits::Datagram;
pub use udp::UdpLink;
